use std::fmt;

use anyhow::{anyhow, Result};
use secrecy::{ExposeSecret, SecretString};
use totp_rs::{Algorithm, Secret, TOTP};

/// RFC 6238 code generator (SHA-1).
pub struct TotpGenerator {
    totp: TOTP,
}

impl fmt::Debug for TotpGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TotpGenerator")
            .field("digits", &self.totp.digits)
            .field("period", &self.totp.step)
            .finish_non_exhaustive()
    }
}

impl TotpGenerator {
    /// Build a generator from a base32 secret, as shown by authenticator app enrolment.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is not valid base32, is shorter than 128 bits,
    /// or `digits` is outside 6..=8.
    pub fn new(secret: &SecretString, digits: usize, period: u64) -> Result<Self> {
        let encoded: String = secret
            .expose_secret()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();

        let bytes = Secret::Encoded(encoded)
            .to_bytes()
            .map_err(|e| anyhow!("invalid TOTP secret: {e:?}"))?;

        let totp = TOTP::new(Algorithm::SHA1, digits, 1, period, bytes)
            .map_err(|e| anyhow!("invalid TOTP parameters: {e}"))?;

        Ok(Self { totp })
    }

    /// Code for the current time step.
    ///
    /// # Errors
    ///
    /// Returns an error if the system clock is before the Unix epoch.
    pub fn current(&self) -> Result<String> {
        self.totp
            .generate_current()
            .map_err(|e| anyhow!("system clock error: {e}"))
    }

    #[must_use]
    pub fn at(&self, unix_seconds: u64) -> String {
        self.totp.generate(unix_seconds)
    }
}
