use rsa::RsaPublicKey;
use std::collections::HashMap;

use crate::errors::{SecurityError, SecurityResult};
use crate::security::secure_rng::random;
use crate::session::keys::SessionKeys;

/// Symmetric session between one control point and the device.
///
/// Both sides hold a copy. Each direction carries its own sequence counter;
/// a signed message is only accepted with a number strictly greater than the
/// last one accepted in that direction.
#[derive(Debug)]
pub struct Session {
    cp_key_id: u32,
    device_key_id: u32,
    keys: SessionKeys,
    sequence_base: String,
    cp_sequence_number: u32,
    device_sequence_number: u32,
    caller_public_key: Option<RsaPublicKey>,
}

impl Session {
    pub fn new(
        cp_key_id: u32,
        device_key_id: u32,
        keys: SessionKeys,
        sequence_base: String,
        caller_public_key: Option<RsaPublicKey>,
    ) -> Self {
        Session {
            cp_key_id,
            device_key_id,
            keys,
            sequence_base,
            cp_sequence_number: 1,
            device_sequence_number: 1,
            caller_public_key,
        }
    }

    pub fn cp_key_id(&self) -> u32 {
        self.cp_key_id
    }

    pub fn device_key_id(&self) -> u32 {
        self.device_key_id
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    pub fn sequence_base(&self) -> &str {
        &self.sequence_base
    }

    pub fn cp_sequence_number(&self) -> u32 {
        self.cp_sequence_number
    }

    pub fn device_sequence_number(&self) -> u32 {
        self.device_sequence_number
    }

    pub fn caller_public_key(&self) -> Option<&RsaPublicKey> {
        self.caller_public_key.as_ref()
    }

    /// Accept a control point message numbered `sequence_number`.
    pub fn accept_cp_sequence(&mut self, sequence_base: &str, sequence_number: u32) -> SecurityResult<()> {
        accept(&self.sequence_base, &mut self.cp_sequence_number, sequence_base, sequence_number)
    }

    /// Accept a device message numbered `sequence_number`.
    pub fn accept_device_sequence(&mut self, sequence_base: &str, sequence_number: u32) -> SecurityResult<()> {
        accept(&self.sequence_base, &mut self.device_sequence_number, sequence_base, sequence_number)
    }

    /// Number for the next outgoing control point message.
    pub fn next_cp_sequence(&mut self) -> SecurityResult<u32> {
        advance(&mut self.cp_sequence_number)
    }

    /// Number for the next outgoing device message.
    pub fn next_device_sequence(&mut self) -> SecurityResult<u32> {
        advance(&mut self.device_sequence_number)
    }
}

fn accept(expected_base: &str, current: &mut u32, base: &str, number: u32) -> SecurityResult<()> {
    if base != expected_base || number <= *current {
        return Err(SecurityError::ReplayDetected);
    }
    *current = number;
    Ok(())
}

fn advance(current: &mut u32) -> SecurityResult<u32> {
    *current = current
        .checked_add(1)
        .ok_or(SecurityError::ReplayDetected)?;
    Ok(*current)
}

/// Device-side sessions keyed by device-assigned key ID.
#[derive(Debug)]
pub struct SessionTable {
    sessions: HashMap<u32, Session>,
    next_device_key_id: u32,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTable {
    pub fn new() -> Self {
        SessionTable {
            sessions: HashMap::new(),
            next_device_key_id: 1,
        }
    }

    /// Store a new session for `keys`; returns its device key ID and sequence base.
    pub fn establish(
        &mut self,
        cp_key_id: u32,
        keys: SessionKeys,
        caller_public_key: Option<RsaPublicKey>,
    ) -> SecurityResult<(u32, String)> {
        let device_key_id = self.allocate_id()?;
        let sequence_base = random::sequence_base()?;
        self.sessions.insert(
            device_key_id,
            Session::new(cp_key_id, device_key_id, keys, sequence_base.clone(), caller_public_key),
        );
        Ok((device_key_id, sequence_base))
    }

    pub fn get(&self, device_key_id: u32) -> SecurityResult<&Session> {
        self.sessions
            .get(&device_key_id)
            .ok_or(SecurityError::NoSuchSession(device_key_id))
    }

    pub fn get_mut(&mut self, device_key_id: u32) -> SecurityResult<&mut Session> {
        self.sessions
            .get_mut(&device_key_id)
            .ok_or(SecurityError::NoSuchSession(device_key_id))
    }

    pub fn expire(&mut self, device_key_id: u32) -> SecurityResult<Session> {
        self.sessions
            .remove(&device_key_id)
            .ok_or(SecurityError::NoSuchSession(device_key_id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    fn allocate_id(&mut self) -> SecurityResult<u32> {
        // IDs are not reused while the table lives
        let id = self.next_device_key_id;
        self.next_device_key_id = id
            .checked_add(1)
            .ok_or(SecurityError::CapacityExceeded("session ids"))?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn session() -> Session {
        Session::new(
            7,
            1,
            SessionKeys::generate().expect("Should generate keys"),
            "BASE".to_string(),
            None,
        )
    }

    #[rstest]
    #[case(2, true)]
    #[case(100, true)]
    #[case(1, false)]
    #[case(0, false)]
    fn test_first_cp_sequence(#[case] number: u32, #[case] accepted: bool) {
        let mut session = session();
        assert_eq!(session.accept_cp_sequence("BASE", number).is_ok(), accepted);
    }

    #[test]
    fn test_replay_is_rejected() {
        let mut session = session();
        session.accept_cp_sequence("BASE", 5).expect("Should accept 5");
        assert_eq!(
            session.accept_cp_sequence("BASE", 5),
            Err(SecurityError::ReplayDetected)
        );
        assert_eq!(
            session.accept_cp_sequence("BASE", 4),
            Err(SecurityError::ReplayDetected)
        );
        assert_eq!(
            session.accept_cp_sequence("OTHER", 9),
            Err(SecurityError::ReplayDetected)
        );
        session.accept_cp_sequence("BASE", 6).expect("Should accept 6");
        assert_eq!(session.cp_sequence_number(), 6);
        assert_eq!(session.device_sequence_number(), 1);
    }

    #[test]
    fn test_outgoing_numbers_are_acceptable_by_peer() {
        let mut sender = session();
        let mut receiver = session();
        for _ in 0..3 {
            let number = sender.next_device_sequence().expect("Should advance");
            receiver
                .accept_device_sequence("BASE", number)
                .expect("Peer should accept next number");
        }
        assert_eq!(receiver.device_sequence_number(), 4);
    }

    #[test]
    fn test_table_lifecycle() {
        let mut table = SessionTable::new();
        let (first, base) = table
            .establish(3, SessionKeys::generate().expect("Should generate keys"), None)
            .expect("Should establish");
        let (second, _) = table
            .establish(3, SessionKeys::generate().expect("Should generate keys"), None)
            .expect("Should establish");

        assert_ne!(first, second);
        assert_eq!(table.get(first).expect("Should find").sequence_base(), base);
        assert_eq!(table.get(first).expect("Should find").cp_key_id(), 3);

        table.expire(first).expect("Should expire");
        assert!(matches!(table.expire(first), Err(SecurityError::NoSuchSession(id)) if id == first));
        assert!(matches!(table.get(first), Err(SecurityError::NoSuchSession(_))));
        assert_eq!(table.len(), 1);
    }
}
