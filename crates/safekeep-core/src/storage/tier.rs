use std::fmt;

use serde::{Deserialize, Serialize};

/// Security class of a backend. Variants are declared weakest first so the
/// derived ordering reads naturally: `EncryptedSecure > ... > None`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SecurityTier {
    /// No backend is serving requests.
    #[default]
    None,
    /// A human types the value when it is needed.
    ManualEmergency,
    /// Process memory only; lost on exit.
    MemoryLow,
    /// Persisted without real encryption, but never as plaintext.
    ObfuscatedMedium,
    /// Encrypted at rest with a key held by the platform keystore.
    EncryptedSecure,
}

impl SecurityTier {
    pub fn label(self) -> &'static str {
        match self {
            SecurityTier::None => "none",
            SecurityTier::ManualEmergency => "manual",
            SecurityTier::MemoryLow => "memory",
            SecurityTier::ObfuscatedMedium => "obfuscated",
            SecurityTier::EncryptedSecure => "encrypted",
        }
    }
}

impl fmt::Display for SecurityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_ordered_by_strength() {
        assert!(SecurityTier::EncryptedSecure > SecurityTier::ObfuscatedMedium);
        assert!(SecurityTier::ObfuscatedMedium > SecurityTier::MemoryLow);
        assert!(SecurityTier::MemoryLow > SecurityTier::ManualEmergency);
        assert!(SecurityTier::ManualEmergency > SecurityTier::None);
    }

    #[test]
    fn labels_match_serialized_names() {
        assert_eq!(SecurityTier::EncryptedSecure.to_string(), "encrypted");
        assert_eq!(SecurityTier::default(), SecurityTier::None);
    }
}
