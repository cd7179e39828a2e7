use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Unordered pair of distinct usernames, stored sorted so both sides agree on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Participants {
    first: String,
    second: String,
}

impl Participants {
    /// Returns `None` when both names are the same user.
    pub fn new(a: &str, b: &str) -> Option<Self> {
        if a == b || a.is_empty() || b.is_empty() {
            return None;
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        Some(Self {
            first: first.to_string(),
            second: second.to_string(),
        })
    }

    /// Build from the backend's `users` list, which must hold exactly two names.
    pub fn from_users(users: &[String]) -> Option<Self> {
        match users {
            [a, b] => Self::new(a, b),
            _ => None,
        }
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn second(&self) -> &str {
        &self.second
    }

    pub fn contains(&self, username: &str) -> bool {
        self.first == username || self.second == username
    }

    /// The participant that is not `username`, if `username` is one of them.
    pub fn other(&self, username: &str) -> Option<&str> {
        if self.first == username {
            Some(&self.second)
        } else if self.second == username {
            Some(&self.first)
        } else {
            None
        }
    }
}

impl fmt::Display for Participants {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.first, self.second)
    }
}

/// Opaque symmetric key blob. Empty when the backend keeps the key to itself.
#[derive(Clone, PartialEq, Eq, Default, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(value: &str) -> Option<Self> {
        hex::decode(value.trim()).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_server_held(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({} bytes)", self.0.len())
    }
}

/// Record that a symmetric key exists for a pair of users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedKeyRecord {
    pub participants: Participants,
    pub key: KeyMaterial,
}

impl SharedKeyRecord {
    pub fn new(participants: Participants, key: KeyMaterial) -> Self {
        Self { participants, key }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participants_are_unordered() {
        assert_eq!(
            Participants::new("bob", "alice"),
            Participants::new("alice", "bob")
        );
        let pair = Participants::new("bob", "alice").unwrap();
        assert_eq!(pair.first(), "alice");
        assert_eq!(pair.other("alice"), Some("bob"));
        assert_eq!(pair.other("carol"), None);
    }

    #[test]
    fn test_participants_reject_self_pair() {
        assert!(Participants::new("alice", "alice").is_none());
        assert!(Participants::from_users(&["alice".into()]).is_none());
        assert!(Participants::from_users(&["a".into(), "b".into(), "c".into()]).is_none());
    }

    #[test]
    fn test_key_material_debug_is_redacted() {
        let key = KeyMaterial::from_hex("deadbeef").unwrap();
        assert_eq!(format!("{:?}", key), "KeyMaterial(4 bytes)");
        assert!(KeyMaterial::from_hex("not hex").is_none());
    }
}
