//! Key selection: choosing the concrete (sub)key for an operation.
//!
//! Given an identity hint and a purpose, selection scans the ring for
//! nodes whose capability flags cover the purpose, whose owning primary
//! answers to the identity, and whose validity window includes `now`.
//! Subkeys are preferred over primaries; remaining ties are broken by
//! creation time according to the [`SelectionPolicy`], and finally by
//! fingerprint so the outcome never depends on insertion order.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Error, Result};
use crate::key::KeyId;
use crate::keyring::{KeyNode, Keyring, Role};
use crate::types::Purpose;

/// Which of several equally capable keys wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Prefer the most recently created key (default, matches the
    /// behavior of common OpenPGP implementations)
    #[default]
    NewestCreation,
    /// Prefer the oldest key
    OldestCreation,
}

/// Tunable selection behavior.
#[derive(Debug, Clone, Default)]
pub struct SelectionPolicy {
    /// How creation-time ties between capable keys are broken
    pub tie_break: TieBreak,
}

/// Select the key to use for `purpose` on behalf of `identity`.
///
/// `identity` matches when it is a substring of any user id on the
/// owning primary key, so `"alice@example.com"` finds
/// `"Alice <alice@example.com>"`.
pub fn select<'a>(
    ring: &'a Keyring,
    role: Role,
    purpose: Purpose,
    identity: &str,
    policy: &SelectionPolicy,
    now: DateTime<Utc>,
) -> Result<&'a KeyNode> {
    let mut candidates: Vec<&KeyNode> = ring
        .nodes(role)
        .map(|(_, node)| node)
        .filter(|node| covers_purpose(node, purpose))
        .filter(|node| {
            ring.identities_of(role, node)
                .iter()
                .any(|uid| uid.contains(identity))
        })
        .filter(|node| {
            !node.material.is_expired(now) && !ring.primary_of(role, node).material.is_expired(now)
        })
        .collect();

    // A capable subkey always beats a capable primary.
    if candidates.iter().any(|node| node.is_subkey()) {
        candidates.retain(|node| node.is_subkey());
    }

    candidates.sort_by(|a, b| {
        let by_creation = match policy.tie_break {
            TieBreak::NewestCreation => b.material.created_at.cmp(&a.material.created_at),
            TieBreak::OldestCreation => a.material.created_at.cmp(&b.material.created_at),
        };
        by_creation.then_with(|| a.material.fingerprint.cmp(&b.material.fingerprint))
    });

    match candidates.first() {
        Some(node) => {
            debug!(
                identity,
                %purpose,
                fingerprint = %node.material.fingerprint,
                subkey = node.is_subkey(),
                "selected key"
            );
            Ok(node)
        }
        None => Err(Error::KeyNotFound(format!(
            "no key capable of {purpose} for identity {identity:?}"
        ))),
    }
}

/// Find the secret node a session-key packet names, regardless of
/// capability flags; decryption trusts the key id on the wire.
pub fn find_decryption_key<'a>(ring: &'a Keyring, key_id: &KeyId) -> Option<&'a KeyNode> {
    ring.find_by_key_id(Role::Secret, key_id)
        .filter(|node| node.material.has_secret())
}

fn covers_purpose(node: &KeyNode, purpose: Purpose) -> bool {
    match purpose {
        Purpose::Encrypt => node.material.flags.encrypt,
        Purpose::Sign => node.material.flags.sign && node.material.has_secret(),
        Purpose::Decrypt => node.material.has_secret(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::timestamp_to_datetime;
    use crate::key::{KeyMaterial, SecretMpis, SecretParams};
    use crate::types::KeyFlags;

    fn rsa(seed: u8, created: u32, flags: KeyFlags) -> KeyMaterial {
        KeyMaterial::new_rsa(
            vec![seed; 256],
            vec![0x01, 0x00, 0x01],
            timestamp_to_datetime(created),
            flags,
        )
    }

    fn dummy_secret() -> SecretParams {
        SecretParams::Unprotected {
            mpis: SecretMpis {
                d: vec![0x11; 255],
                p: vec![0x22; 128],
                q: vec![0x33; 128],
                u: vec![0x44; 128],
            },
        }
    }

    fn now() -> DateTime<Utc> {
        timestamp_to_datetime(1_700_000_000)
    }

    #[test]
    fn test_subkey_preferred_over_capable_primary() {
        // Primary can encrypt too, but the subkey must win.
        let primary_flags = KeyFlags {
            encrypt: true,
            sign: true,
            certify: true,
        };
        let key = rsa(0xA0, 1_600_000_000, primary_flags)
            .with_user_id("Alice <alice@example.com>")
            .with_subkey(rsa(0xA1, 1_600_000_500, KeyFlags::encryption_subkey()));
        let subkey_fpr = key.subkeys[0].fingerprint;

        let mut ring = Keyring::new();
        ring.insert_public(key).unwrap();
        let chosen = select(
            &ring,
            Role::Public,
            Purpose::Encrypt,
            "alice@example.com",
            &SelectionPolicy::default(),
            now(),
        )
        .unwrap();
        assert!(chosen.is_subkey());
        assert_eq!(chosen.material.fingerprint, subkey_fpr);
    }

    #[test]
    fn test_newest_subkey_wins_by_default() {
        let key = rsa(0xB0, 1_500_000_000, KeyFlags::primary())
            .with_user_id("Bob <bob@example.com>")
            .with_subkey(rsa(0xB1, 1_500_000_100, KeyFlags::encryption_subkey()))
            .with_subkey(rsa(0xB2, 1_600_000_000, KeyFlags::encryption_subkey()));
        let newest = key.subkeys[1].fingerprint;

        let mut ring = Keyring::new();
        ring.insert_public(key).unwrap();
        let chosen = select(
            &ring,
            Role::Public,
            Purpose::Encrypt,
            "bob@example.com",
            &SelectionPolicy::default(),
            now(),
        )
        .unwrap();
        assert_eq!(chosen.material.fingerprint, newest);

        let oldest_policy = SelectionPolicy {
            tie_break: TieBreak::OldestCreation,
        };
        let chosen = select(
            &ring,
            Role::Public,
            Purpose::Encrypt,
            "bob@example.com",
            &oldest_policy,
            now(),
        )
        .unwrap();
        assert_ne!(chosen.material.fingerprint, newest);
    }

    #[test]
    fn test_selection_ignores_insertion_order() {
        let alice = rsa(0xC0, 1_500_000_000, KeyFlags::primary())
            .with_user_id("Team <team@example.com>")
            .with_subkey(rsa(0xC1, 1_550_000_000, KeyFlags::encryption_subkey()));
        let bob = rsa(0xD0, 1_500_000_000, KeyFlags::primary())
            .with_user_id("Team <team@example.com>")
            .with_subkey(rsa(0xD1, 1_550_000_000, KeyFlags::encryption_subkey()));

        let mut forward = Keyring::new();
        forward.insert_public(alice.clone()).unwrap();
        forward.insert_public(bob.clone()).unwrap();
        let mut reverse = Keyring::new();
        reverse.insert_public(bob).unwrap();
        reverse.insert_public(alice).unwrap();

        let policy = SelectionPolicy::default();
        let a = select(
            &forward,
            Role::Public,
            Purpose::Encrypt,
            "team@example.com",
            &policy,
            now(),
        )
        .unwrap();
        let b = select(
            &reverse,
            Role::Public,
            Purpose::Encrypt,
            "team@example.com",
            &policy,
            now(),
        )
        .unwrap();
        assert_eq!(a.material.fingerprint, b.material.fingerprint);
    }

    #[test]
    fn test_expired_keys_are_skipped() {
        let expired = rsa(0xE0, 1_500_000_000, KeyFlags::primary())
            .with_user_id("Carol <carol@example.com>")
            .with_subkey(
                rsa(0xE1, 1_500_000_100, KeyFlags::encryption_subkey())
                    .with_expiry(timestamp_to_datetime(1_600_000_000)),
            );
        let mut ring = Keyring::new();
        ring.insert_public(expired).unwrap();

        assert!(matches!(
            select(
                &ring,
                Role::Public,
                Purpose::Encrypt,
                "carol@example.com",
                &SelectionPolicy::default(),
                now(),
            ),
            Err(Error::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_signing_requires_secret_material() {
        let public_only = rsa(0xF0, 1_500_000_000, KeyFlags::primary())
            .with_user_id("Dave <dave@example.com>");
        let mut ring = Keyring::new();
        ring.insert_public(public_only).unwrap();
        assert!(select(
            &ring,
            Role::Secret,
            Purpose::Sign,
            "dave@example.com",
            &SelectionPolicy::default(),
            now(),
        )
        .is_err());

        let with_secret = rsa(0xF2, 1_500_000_000, KeyFlags::primary())
            .with_user_id("Dave <dave@example.com>")
            .with_secret_params(dummy_secret());
        let mut ring = Keyring::new();
        ring.insert_secret(with_secret).unwrap();
        let chosen = select(
            &ring,
            Role::Secret,
            Purpose::Sign,
            "dave@example.com",
            &SelectionPolicy::default(),
            now(),
        )
        .unwrap();
        assert!(!chosen.is_subkey());
    }

    #[test]
    fn test_decryption_lookup_by_key_id() {
        let key = rsa(0x9A, 1_500_000_000, KeyFlags::primary())
            .with_user_id("Eve <eve@example.com>")
            .with_secret_params(dummy_secret())
            .with_subkey(
                rsa(0x9B, 1_500_000_100, KeyFlags::encryption_subkey())
                    .with_secret_params(dummy_secret()),
            );
        let subkey_id = key.subkeys[0].key_id();
        let mut ring = Keyring::new();
        ring.insert_secret(key).unwrap();

        let found = find_decryption_key(&ring, &subkey_id).unwrap();
        assert!(found.is_subkey());
        assert!(find_decryption_key(&ring, &KeyId::from_bytes([0; 8])).is_none());
    }
}
