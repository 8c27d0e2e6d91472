pub mod turn;

pub use turn::{FloorState, Role, TurnController, TurnStatus};

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::{debug, info};

use duolog_config::TurnSettings;

use crate::ws::WsSender;

/// Room codes avoid glyphs that read ambiguously when spoken or typed
/// (no I/L/O/0/1).
const CODE_ALPHABET: [char; 31] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U',
    'V', 'W', 'X', 'Y', 'Z', '2', '3', '4', '5', '6', '7', '8', '9',
];

pub const ROOM_CODE_LEN: usize = 6;

pub fn generate_room_code() -> String {
    nanoid::nanoid!(ROOM_CODE_LEN, &CODE_ALPHABET)
}

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room not found")]
    NotFound,
    #[error("room is full")]
    Full,
}

/// One connected side of a conversation.
///
/// `sender`, `socket_open`, `tts_cancelled`, and `utterance_id` are the only
/// fields touched outside the owning handler: the dispatcher reads them from
/// its jobs. `tts_cancelled` is written on barge-in and read with benign
/// races — at worst one stale TTS slips through and is silenced by the mic
/// lock.
pub struct Participant {
    pub role: Role,
    pub name: String,
    pub language: String,
    pub session_id: String,
    pub sender: WsSender,
    pub socket_open: AtomicBool,
    pub tts_cancelled: AtomicBool,
    /// Monotonic per-session utterance counter; stale partial results are
    /// discarded when their id no longer matches.
    pub utterance_id: AtomicU64,
}

/// A two-party conversation: language pair, turn controller, and up to two
/// participants.
pub struct Room {
    pub code: String,
    pub lang_a: String,
    pub lang_b: String,
    pub turn: Mutex<TurnController>,
    participants: Mutex<[Option<Arc<Participant>>; 2]>,
}

impl Room {
    fn new(code: String, lang_a: String, lang_b: String, turn: &TurnSettings) -> Self {
        Self {
            code,
            lang_a,
            lang_b,
            turn: Mutex::new(TurnController::new(
                turn.lockout_buffer_ms,
                turn.grace_a_ms,
                turn.grace_b_ms,
            )),
            participants: Mutex::new([None, None]),
        }
    }

    pub fn language_for(&self, role: Role) -> &str {
        match role {
            Role::A => &self.lang_a,
            Role::B => &self.lang_b,
        }
    }

    /// Claims the first free slot for a new participant.
    ///
    /// The creator lands on role `a`, the joiner on role `b`; both paths go
    /// through here so a concurrent double-join cannot overfill the room.
    pub fn admit(
        &self,
        name: String,
        session_id: String,
        sender: WsSender,
    ) -> Result<Arc<Participant>, RoomError> {
        let mut slots = self.participants.lock();
        let role = if slots[0].is_none() {
            Role::A
        } else if slots[1].is_none() {
            Role::B
        } else {
            return Err(RoomError::Full);
        };

        let participant = Arc::new(Participant {
            role,
            name,
            language: self.language_for(role).to_string(),
            session_id,
            sender,
            socket_open: AtomicBool::new(true),
            tts_cancelled: AtomicBool::new(false),
            utterance_id: AtomicU64::new(0),
        });
        slots[role as usize] = Some(participant.clone());
        Ok(participant)
    }

    pub fn participant(&self, role: Role) -> Option<Arc<Participant>> {
        self.participants.lock()[role as usize].clone()
    }

    pub fn partner_of(&self, role: Role) -> Option<Arc<Participant>> {
        self.participant(role.other())
    }

    /// Removes a participant; returns true when the room is now empty.
    pub fn remove(&self, role: Role) -> bool {
        let mut slots = self.participants.lock();
        slots[role as usize] = None;
        slots.iter().all(Option::is_none)
    }

    pub fn occupancy(&self) -> usize {
        self.participants
            .lock()
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    pub fn participants_snapshot(&self) -> Vec<Arc<Participant>> {
        self.participants
            .lock()
            .iter()
            .flatten()
            .cloned()
            .collect()
    }
}

/// Process-wide registry of live rooms, keyed by room code.
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Room>>,
    turn_settings: TurnSettings,
}

impl RoomRegistry {
    pub fn new(turn_settings: TurnSettings) -> Self {
        Self {
            rooms: DashMap::new(),
            turn_settings,
        }
    }

    /// Creates a room with a fresh unique code.
    pub fn create(&self, lang_a: String, lang_b: String) -> Arc<Room> {
        loop {
            let code = generate_room_code();
            match self.rooms.entry(code.clone()) {
                // Code collision: roll again
                Entry::Occupied(_) => continue,
                Entry::Vacant(vacant) => {
                    let room =
                        Arc::new(Room::new(code.clone(), lang_a, lang_b, &self.turn_settings));
                    vacant.insert(room.clone());
                    info!(room_id = %code, lang_a = %room.lang_a, lang_b = %room.lang_b, "room created");
                    return room;
                }
            }
        }
    }

    pub fn get(&self, code: &str) -> Result<Arc<Room>, RoomError> {
        self.rooms
            .get(code)
            .map(|r| r.clone())
            .ok_or(RoomError::NotFound)
    }

    /// Detaches a participant and tears the room down once empty.
    pub fn leave(&self, room: &Arc<Room>, role: Role) {
        if room.remove(role) {
            self.rooms.remove(&room.code);
            info!(room_id = %room.code, "room destroyed");
        } else {
            debug!(room_id = %room.code, role = role.as_str(), "participant left");
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<Room>> {
        self.rooms.iter().map(|r| r.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(TurnSettings::default())
    }

    #[test]
    fn code_alphabet_has_no_ambiguous_glyphs() {
        let code = generate_room_code();
        assert_eq!(code.len(), ROOM_CODE_LEN);
        for ch in code.chars() {
            assert!(CODE_ALPHABET.contains(&ch), "unexpected glyph {ch}");
        }
        for forbidden in ['I', 'L', 'O', '0', '1'] {
            assert!(!CODE_ALPHABET.contains(&forbidden));
        }
    }

    #[test]
    fn codes_are_unique_across_live_rooms() {
        let registry = registry();
        let mut codes = std::collections::HashSet::new();
        for _ in 0..64 {
            let room = registry.create("en".into(), "es".into());
            assert!(codes.insert(room.code.clone()));
        }
        assert_eq!(registry.snapshot().len(), 64);
    }

    #[test]
    fn unknown_code_is_not_found() {
        let registry = registry();
        assert!(matches!(registry.get("ZZZZZZ"), Err(RoomError::NotFound)));
    }

    #[test]
    fn languages_map_to_roles() {
        let registry = registry();
        let room = registry.create("pt".into(), "en".into());
        assert_eq!(room.language_for(Role::A), "pt");
        assert_eq!(room.language_for(Role::B), "en");
    }
}
