// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use figment::Figment;
use serde::de::DeserializeOwned;

/// Error returned when a configuration section could not be loaded or is
/// invalid
pub type ConfigurationError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Trait implemented by all configuration sections, to load them from the
/// merged configuration sources and validate them.
pub trait ConfigurationSection: Sized + DeserializeOwned {
    /// Where this section lives relative to the root. `None` for the root
    /// itself.
    const PATH: Option<&'static str> = None;

    /// Validate the configuration section
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    fn validate(&self, _figment: &Figment) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Extract configuration from a Figment instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration could not be loaded or is invalid
    fn extract(figment: &Figment) -> Result<Self, ConfigurationError> {
        let this: Self = match Self::PATH {
            Some(path) => figment.extract_inner(path)?,
            None => figment.extract()?,
        };

        this.validate(figment)?;
        Ok(this)
    }
}

/// Extension trait for [`ConfigurationSection`]s which have a default value
pub trait ConfigurationSectionExt: ConfigurationSection + Default {
    /// Extract the configuration section from the given [`Figment`], falling
    /// back to the default value if the section is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration section is present but invalid.
    fn extract_or_default(figment: &Figment) -> Result<Self, ConfigurationError> {
        match Self::PATH {
            Some(path) if !figment.contains(path) => Ok(Self::default()),
            _ => Self::extract(figment),
        }
    }
}

impl<T: ConfigurationSection + Default> ConfigurationSectionExt for T {}
