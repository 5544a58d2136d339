use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    haar::{NUM_CHANNELS, NUM_COEFS},
    weights::Mode,
};

const fn default_limit() -> usize {
    20
}

const fn default_min_shared() -> usize {
    1
}

/// Tunables for one similarity query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Weight table calibration.
    #[serde(default)]
    pub mode: Mode,
    /// Coefficients a candidate must share with the query before it is
    /// scored. `0` scores the whole corpus.
    #[serde(default = "default_min_shared")]
    pub min_shared: usize,
    /// Maximum number of results.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Drop results whose distance is above this value.
    #[serde(default)]
    pub max_distance: Option<f64>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            min_shared: default_min_shared(),
            limit: default_limit(),
            max_distance: None,
        }
    }
}

impl QueryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_min_shared(mut self, min_shared: usize) -> Self {
        self.min_shared = min_shared;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = Some(max_distance);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let max_shared = NUM_CHANNELS * NUM_COEFS;
        if self.min_shared > max_shared {
            return Err(Error::InvalidConfig(format!(
                "min_shared must be at most {max_shared}, got {}",
                self.min_shared
            )));
        }
        if let Some(max_distance) = self.max_distance {
            if max_distance.is_nan() {
                return Err(Error::InvalidConfig("max_distance is NaN".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = QueryConfig::new();
        assert_eq!(config.mode, Mode::Photographic);
        assert_eq!(config.min_shared, 1);
        assert_eq!(config.limit, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builders_and_validation() {
        let config = QueryConfig::new()
            .with_mode(Mode::Sketch)
            .with_limit(5)
            .with_min_shared(3)
            .with_max_distance(-10.0);
        assert!(config.validate().is_ok());
        assert_eq!(config.max_distance, Some(-10.0));

        assert!(matches!(
            QueryConfig::new().with_min_shared(121).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(QueryConfig::new()
            .with_max_distance(f64::NAN)
            .validate()
            .is_err());
    }
}
