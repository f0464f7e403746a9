//! Settings loaded from an optional file and `RIDE_ESCROW__*` env vars

use crate::{
    amount::TokenAmount,
    error::EscrowError,
    escrow::{CancelPolicy, EscrowConfig},
    models::{Address, FeePercentage},
    EscrowResult,
};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Prefix of environment overrides, e.g. `RIDE_ESCROW__FEE_PERCENTAGE=20`
pub const ENV_PREFIX: &str = "RIDE_ESCROW";

#[derive(Debug, Clone, Deserialize)]
pub struct EscrowSettings {
    pub admin: String,
    pub escrow_account: String,
    pub fee_percentage: u8,
    pub cancel_policy: CancelPolicy,
    pub max_fare: String,
    pub log_level: String,
}

impl EscrowSettings {
    /// Load settings, layering defaults, then `path` (if any), then env vars
    pub fn load(path: Option<&Path>) -> EscrowResult<Self> {
        let mut builder = Config::builder()
            .set_default("admin", "owner")?
            .set_default("escrow_account", "ride-escrow")?
            .set_default("fee_percentage", 10)?
            .set_default("cancel_policy", "anyone")?
            .set_default("max_fare", "1000000")?
            .set_default("log_level", "info")?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> EscrowResult<()> {
        self.escrow_config()?;
        self.escrow_account()?;
        Ok(())
    }

    /// Escrow configuration described by these settings
    pub fn escrow_config(&self) -> EscrowResult<EscrowConfig> {
        let admin = Address::new(self.admin.clone())
            .map_err(|_| EscrowError::config("admin must not be empty"))?;
        let fee_percentage = FeePercentage::new(self.fee_percentage)
            .map_err(|e| EscrowError::config(e.to_string()))?;
        let max_fare = TokenAmount::parse_decimal(&self.max_fare)
            .map_err(|e| EscrowError::config(format!("max_fare: {}", e)))?;

        Ok(EscrowConfig {
            admin,
            fee_percentage,
            cancel_policy: self.cancel_policy,
            max_fare,
        })
    }

    pub fn escrow_account(&self) -> EscrowResult<Address> {
        Address::new(self.escrow_account.clone())
            .map_err(|_| EscrowError::config("escrow_account must not be empty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults() {
        let settings = EscrowSettings::load(None).unwrap();
        let config = settings.escrow_config().unwrap();

        assert_eq!(config.fee_percentage.value(), 10);
        assert_eq!(config.cancel_policy, CancelPolicy::Anyone);
        assert_eq!(config.max_fare, TokenAmount::from_tokens(1_000_000));
    }

    #[test]
    fn test_file_overrides() {
        let path = std::env::temp_dir().join(format!("ride-escrow-{}.toml", uuid::Uuid::new_v4()));
        fs::write(
            &path,
            "admin = \"treasurer\"\nfee_percentage = 25\ncancel_policy = \"participants\"\nmax_fare = \"50.5\"\n",
        )
        .unwrap();

        let settings = EscrowSettings::load(Some(&path)).unwrap();
        fs::remove_file(&path).unwrap();

        let config = settings.escrow_config().unwrap();
        assert_eq!(config.admin.as_str(), "treasurer");
        assert_eq!(config.fee_percentage.value(), 25);
        assert_eq!(config.cancel_policy, CancelPolicy::Participants);
        assert_eq!(config.max_fare, TokenAmount::parse_decimal("50.5").unwrap());
    }

    #[test]
    fn test_out_of_range_fee_rejected() {
        let path = std::env::temp_dir().join(format!("ride-escrow-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "fee_percentage = 150\n").unwrap();

        let result = EscrowSettings::load(Some(&path));
        fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(EscrowError::Config(_))));
    }
}
