// Outbound batching tests
// Timing runs on tokio's paused clock, so delays and windows are exact

mod common;
use common::{auth, settle, Harness};

use std::time::Duration;
use tokio::time::{sleep, Instant};

use ircsocial::irc::MAX_LINE_LEN;

async fn online() -> Harness {
    let h = Harness::new(vec![auth("alice")]);
    h.provider.login(None).await.expect("login succeeds");
    h.transport.emit(":irc.test 353 alice = #social :alice bob carol");
    settle().await;
    h
}

#[tokio::test(start_paused = true)]
async fn test_burst_goes_out_as_one_message() {
    let h = online().await;
    let start = Instant::now();

    for i in 0..5 {
        h.provider.send_message("bob", format!("message {}", i)).await.unwrap();
    }
    settle().await;
    assert!(h.transport.privmsgs().is_empty(), "flushed before the delay elapsed");

    sleep(Duration::from_millis(150)).await;
    let flushed = h.transport.privmsgs();
    assert_eq!(flushed.len(), 1);

    let (at, to, payloads) = &flushed[0];
    assert_eq!(to, "bob");
    assert_eq!(
        payloads,
        &(0..5).map(|i| format!("message {}", i)).collect::<Vec<_>>()
    );
    assert!(*at - start >= Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_destinations_are_batched_independently() {
    let h = online().await;

    h.provider.send_message("bob", "for bob").await.unwrap();
    sleep(Duration::from_millis(60)).await;
    h.provider.send_message("carol", "for carol").await.unwrap();
    sleep(Duration::from_millis(300)).await;

    let flushed = h.transport.privmsgs();
    assert_eq!(flushed.len(), 2);
    assert_eq!(flushed[0].1, "bob");
    assert_eq!(flushed[0].2, vec!["for bob".to_string()]);
    assert_eq!(flushed[1].1, "carol");
    assert_eq!(flushed[1].2, vec!["for carol".to_string()]);
    assert!(flushed[1].0 - flushed[0].0 >= Duration::from_millis(60));
}

#[tokio::test(start_paused = true)]
async fn test_pause_after_send_starts_new_batch() {
    let h = online().await;

    h.provider.send_message("bob", "first").await.unwrap();
    sleep(Duration::from_millis(250)).await;
    h.provider.send_message("bob", "second").await.unwrap();
    sleep(Duration::from_millis(250)).await;

    let payloads: Vec<Vec<String>> = h
        .transport
        .privmsgs()
        .into_iter()
        .map(|(_, _, payloads)| payloads)
        .collect();
    assert_eq!(payloads, vec![vec!["first".to_string()], vec!["second".to_string()]]);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_stream_flushes_within_window() {
    let h = online().await;
    let start = Instant::now();
    let interval = Duration::from_millis(50);
    let total = 60;

    // Sends arrive faster than the delay, so only the window forces a flush
    for i in 0..total {
        h.provider.send_message("bob", format!("{}", i)).await.unwrap();
        sleep(interval).await;
    }
    sleep(Duration::from_millis(500)).await;

    let flushed = h.transport.privmsgs();
    assert!(flushed.len() >= 2, "expected the window to split the stream");

    let mut next = 0;
    for (at, to, payloads) in &flushed {
        assert_eq!(to, "bob");
        // The oldest payload in each batch waited no longer than the window
        let first_pushed = start + interval * next as u32;
        assert!(
            *at - first_pushed <= Duration::from_millis(2000),
            "payload {} waited {:?}",
            next,
            *at - first_pushed
        );
        next += payloads.len();
    }

    let delivered: Vec<String> = flushed.into_iter().flat_map(|(_, _, payloads)| payloads).collect();
    let expected: Vec<String> = (0..total).map(|i| format!("{}", i)).collect();
    assert_eq!(delivered, expected);
}

#[tokio::test(start_paused = true)]
async fn test_configured_policy_is_used() {
    let config = ircsocial::AdapterConfig {
        batch_delay_ms: 10,
        max_batch_window_ms: 30,
        ..common::test_config()
    };
    let h = Harness::with_config(config, vec![auth("alice")]);
    h.provider.login(None).await.unwrap();
    h.transport.emit(":irc.test 353 alice = #social :alice bob");
    settle().await;
    let start = Instant::now();

    h.provider.send_message("bob", "quick").await.unwrap();
    sleep(Duration::from_millis(20)).await;

    let flushed = h.transport.privmsgs();
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].0 - start, Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_large_batch_is_split_to_fit_line_limit() {
    let h = online().await;
    let sent: Vec<String> = (0..40).map(|i| format!("payload number {:04}", i)).collect();

    for payload in &sent {
        h.provider.send_message("bob", payload.as_str()).await.unwrap();
    }
    sleep(Duration::from_millis(150)).await;

    let lines: Vec<String> = h
        .transport
        .sent()
        .into_iter()
        .filter(|(_, line)| line.command == "PRIVMSG")
        .map(|(_, line)| format!("{}\r\n", line))
        .collect();
    assert!(lines.len() >= 2, "expected the batch to be split");
    for line in &lines {
        // Leave room for the prefix the server adds when relaying
        assert!(line.len() + 64 <= MAX_LINE_LEN, "{} bytes: {}", line.len(), line);
    }

    let delivered: Vec<String> = h
        .transport
        .privmsgs()
        .into_iter()
        .flat_map(|(_, _, payloads)| payloads)
        .collect();
    assert_eq!(delivered, sent);
}
