use crate::events::{Participant, TrackPublication};

/// Remote participants of the current room, keyed by sid.
///
/// Updated from session events by the stream controller. Insertion order is kept
/// for display, but identity is always the sid.
#[derive(Debug, Clone, Default)]
pub struct ParticipantManager {
    participants: Vec<Participant>,
}

impl ParticipantManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant, replacing any existing entry with the same sid in place.
    pub fn upsert(&mut self, participant: Participant) {
        match self.participant_mut(&participant.sid) {
            Some(existing) => *existing = participant,
            None => self.participants.push(participant),
        }
    }

    pub fn remove(&mut self, sid: &str) -> Option<Participant> {
        let index = self.participants.iter().position(|p| p.sid == sid)?;
        Some(self.participants.remove(index))
    }

    /// Record a publication for `participant`, adding the participant if unknown.
    pub fn track_published(&mut self, participant: &Participant, publication: TrackPublication) {
        if self.participant(&participant.sid).is_none() {
            self.upsert(participant.clone());
        }
        if let Some(p) = self.participant_mut(&participant.sid) {
            p.upsert_track(publication);
        }
    }

    pub fn track_unpublished(&mut self, participant_sid: &str, track_sid: &str) {
        if let Some(p) = self.participant_mut(participant_sid) {
            p.remove_track(track_sid);
        }
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, sid: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.sid == sid)
    }

    pub fn participant_mut(&mut self, sid: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.sid == sid)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{TrackKind, TrackSource};

    fn make_participant(sid: &str, name: &str) -> Participant {
        Participant {
            name: Some(name.to_string()),
            ..Participant::new(sid, format!("identity-{sid}"))
        }
    }

    fn camera(sid: &str) -> TrackPublication {
        TrackPublication {
            sid: sid.to_string(),
            kind: TrackKind::Video,
            source: TrackSource::Camera,
            muted: false,
        }
    }

    #[test]
    fn add_and_retrieve_participant() {
        let mut mgr = ParticipantManager::new();
        mgr.upsert(make_participant("p1", "Alice"));
        assert_eq!(mgr.participant_count(), 1);
        assert_eq!(mgr.participant("p1").unwrap().name.as_deref(), Some("Alice"));
    }

    #[test]
    fn upsert_replaces_same_sid_in_place() {
        let mut mgr = ParticipantManager::new();
        mgr.upsert(make_participant("p1", "Alice"));
        mgr.upsert(make_participant("p2", "Bob"));
        mgr.upsert(make_participant("p1", "Alicia"));
        assert_eq!(mgr.participant_count(), 2);
        assert_eq!(mgr.participants()[0].name.as_deref(), Some("Alicia"));
    }

    #[test]
    fn remove_participant() {
        let mut mgr = ParticipantManager::new();
        mgr.upsert(make_participant("p1", "Alice"));
        mgr.upsert(make_participant("p2", "Bob"));
        assert!(mgr.remove("p1").is_some());
        assert!(mgr.remove("p1").is_none());
        assert_eq!(mgr.participant_count(), 1);
        assert!(mgr.participant("p2").is_some());
    }

    #[test]
    fn tracks_follow_publications() {
        let mut mgr = ParticipantManager::new();
        let host = make_participant("p1", "Alice");
        mgr.track_published(&host, camera("TR_1"));
        assert_eq!(mgr.participant("p1").unwrap().tracks.len(), 1);
        mgr.track_unpublished("p1", "TR_1");
        assert!(mgr.participant("p1").unwrap().tracks.is_empty());
    }

    #[test]
    fn clear_resets_everything() {
        let mut mgr = ParticipantManager::new();
        mgr.upsert(make_participant("p1", "Alice"));
        mgr.clear();
        assert_eq!(mgr.participant_count(), 0);
    }
}
