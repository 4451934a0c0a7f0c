//! Client configuration.

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;
use keybundle_common::{Error, Result};
use keybundle_crypto::asym::{DEFAULT_RSA_BITS, MIN_RSA_BITS};
use keybundle_crypto::kdf::{DEFAULT_ITERATIONS, MIN_ITERATIONS};

/// Default 2SKD account scope: the secret-store mount name.
pub const DEFAULT_ACCOUNT_SCOPE: &str = "pwmanager";

/// Cost parameters for building a new unlock envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeParams {
    /// PBKDF2 iteration count recorded in the new envelope.
    pub iterations: u32,
    /// RSA modulus size of the identity key pair.
    pub rsa_bits: usize,
}

impl EnvelopeParams {
    /// Check the parameters against the safety floors.
    ///
    /// # Errors
    /// - `InvalidInput` if iterations or modulus size are too low
    pub fn validate(&self) -> Result<()> {
        if self.iterations < MIN_ITERATIONS {
            return Err(Error::InvalidInput(format!(
                "KDF iterations {} below minimum {}",
                self.iterations, MIN_ITERATIONS
            )));
        }
        if self.rsa_bits < MIN_RSA_BITS {
            return Err(Error::InvalidInput(format!(
                "RSA modulus {} below minimum {}",
                self.rsa_bits, MIN_RSA_BITS
            )));
        }
        Ok(())
    }
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            rsa_bits: DEFAULT_RSA_BITS,
        }
    }
}

/// Settings for a [`VaultClient`](crate::VaultClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Second salt of the device-secret half of 2SKD.
    pub account_scope: String,
    /// Cost of envelopes built by `register`.
    pub envelope: EnvelopeParams,
    /// Budget for check-and-set retries.
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Configuration for a given account scope, other settings default.
    pub fn new(account_scope: impl Into<String>) -> Self {
        Self {
            account_scope: account_scope.into(),
            ..Self::default()
        }
    }

    /// Set envelope parameters.
    pub fn with_envelope(mut self, envelope: EnvelopeParams) -> Self {
        self.envelope = envelope;
        self
    }

    /// Set retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<()> {
        if self.account_scope.is_empty() {
            return Err(Error::InvalidInput("Account scope cannot be empty".to_string()));
        }
        self.retry.validate()?;
        self.envelope.validate()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            account_scope: DEFAULT_ACCOUNT_SCOPE.to_string(),
            envelope: EnvelopeParams::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.account_scope, "pwmanager");
        assert_eq!(config.envelope.iterations, 650_000);
        assert_eq!(config.envelope.rsa_bits, 4096);
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_floors_enforced() {
        let weak_kdf = EnvelopeParams {
            iterations: 10_000,
            rsa_bits: 4096,
        };
        assert!(matches!(weak_kdf.validate(), Err(Error::InvalidInput(_))));

        let weak_rsa = EnvelopeParams {
            iterations: 650_000,
            rsa_bits: 1024,
        };
        assert!(weak_rsa.validate().is_err());

        assert!(ClientConfig::new("").validate().is_err());
    }

    #[test]
    fn test_retry_backoff_checked() {
        let shrinking = ClientConfig::default()
            .with_retry(RetryConfig::new(3).with_backoff_multiplier(0.5));
        assert!(matches!(shrinking.validate(), Err(Error::InvalidInput(_))));

        let inverted = ClientConfig::default().with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_millis(10)),
        );
        assert!(inverted.validate().is_err());

        let tuned = ClientConfig::default().with_retry(
            RetryConfig::new(3)
                .with_max_delay(Duration::from_millis(500))
                .with_backoff_multiplier(1.5),
        );
        assert!(tuned.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let envelope = EnvelopeParams {
            iterations: 100_000,
            rsa_bits: 2048,
        };
        let config = ClientConfig::new("team")
            .with_envelope(envelope)
            .with_retry(RetryConfig::new(5));

        assert_eq!(config.account_scope, "team");
        assert_eq!(config.envelope, envelope);
        assert_eq!(config.retry.max_retries, 5);
    }
}
