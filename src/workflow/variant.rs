//! Selection of a workflow variant by name.

use std::fmt;
use std::str::FromStr;

use super::inversion::InversionOps;
use super::noise::KernelSet;
use super::ops::UnitOps;
use super::task::Workflow;
use super::{forward, inversion, noise};
use crate::config::Configuration;
use crate::error::{Result, WorkflowError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Forward,
    Inversion,
    Noise,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Forward, Variant::Inversion, Variant::Noise];

    pub fn name(self) -> &'static str {
        match self {
            Self::Forward => forward::NAME,
            Self::Inversion => inversion::NAME,
            Self::Noise => noise::NAME,
        }
    }

    /// Looks a variant up by its case-insensitive name.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|v| v.name()).collect();
                WorkflowError::config(format!(
                    "unknown workflow '{}', expected one of: {}",
                    name,
                    known.join(", ")
                ))
            })
    }

    /// Builds the workflow record of this variant.
    pub fn build(self, config: &Configuration) -> Result<Workflow> {
        match self {
            Self::Forward => forward::build(UnitOps::base()),
            Self::Inversion => inversion::build(InversionOps::base()),
            Self::Noise => noise::build(KernelSet::parse(&config.noise().kernels)?),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(Variant::from_name("Inversion").unwrap(), Variant::Inversion);
        assert_eq!("noise".parse::<Variant>().unwrap(), Variant::Noise);
        assert!(Variant::from_name("migration").unwrap_err().is_configuration());
    }

    #[test]
    fn test_shared_task_names() {
        let config = Configuration::builder("/run").build();
        let forward = Variant::Forward.build(&config).unwrap();
        let inversion = Variant::Inversion.build(&config).unwrap();

        assert_eq!(
            forward.tasks().names(),
            inversion.tasks().names()[..forward.tasks().len()].to_vec()
        );
        assert_eq!(inversion.tasks().len(), 8);
        assert!(inversion.is_iterative());
        assert!(!forward.is_iterative());
    }

    #[test]
    fn test_noise_kernels_from_config() {
        let config = Configuration::builder("/run").kernels("xx").build();
        assert!(Variant::Noise.build(&config).unwrap_err().is_configuration());
    }
}
