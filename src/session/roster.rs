// Roster and presence handling
// NAMES replies discover contacts; JOIN/PART/QUIT move them between statuses

use log::{debug, info};

use super::SessionActor;
use crate::directory::ContactPatch;
use crate::irc::classify::presence_status;
use crate::irc::PresenceSignal;
use crate::models::{ContactStatus, SocialEvent};

impl SessionActor {
    /// Announce every nick seen for the first time. Known nicks are refreshed silently,
    /// and listed ones previously seen leaving count as present again.
    pub(super) fn on_name_list(&mut self, channel: &str, nicks: Vec<String>) {
        if self.online().is_none() {
            debug!("Ignoring names for {} while not online", channel);
            return;
        }

        let total = nicks.len();
        let mut discovered = 0;
        for nick in nicks {
            if let Some(known) = self.directory.get(&nick) {
                let patch = match known.status {
                    ContactStatus::Offline | ContactStatus::Unknown => {
                        ContactPatch::sighting(ContactStatus::Online)
                    }
                    ContactStatus::Online | ContactStatus::OnlineWithOtherApp => {
                        ContactPatch::seen_now()
                    }
                };
                self.directory.upsert(&nick, patch);
                continue;
            }
            let record = self
                .directory
                .upsert(&nick, ContactPatch::sighting(ContactStatus::Online))
                .into_record();
            discovered += 1;
            self.emit(SocialEvent::ClientState(record));
        }
        info!("{} names in {}, {} new contacts", total, channel, discovered);
    }

    pub(super) fn on_presence(&mut self, nick: &str, signal: &PresenceSignal) {
        let self_id = match self.online() {
            Some(link) => link.self_id.clone(),
            None => {
                debug!("Ignoring presence for {} while not online", nick);
                return;
            }
        };

        // Our own JOIN echo may lack the realname when extended-join was refused
        let status = if nick == self_id {
            match signal {
                PresenceSignal::Unavailable => ContactStatus::Offline,
                PresenceSignal::Available { .. } => ContactStatus::Online,
            }
        } else {
            presence_status(signal, &self.capability())
        };

        let record = self
            .directory
            .upsert(nick, ContactPatch::sighting(status))
            .into_record();
        debug!("Presence: {} is now {:?}", nick, status);
        self.emit(SocialEvent::ClientState(record));
    }
}
