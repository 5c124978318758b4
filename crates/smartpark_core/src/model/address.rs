//! Postal address value object shared by garages and users.

use crate::model::validation::ValidationErrors;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

impl Address {
    pub fn new(street: &str, city: &str, state: &str, zip: &str) -> Self {
        Self {
            street: Some(street.to_string()),
            city: Some(city.to_string()),
            state: Some(state.to_string()),
            zip: Some(zip.to_string()),
        }
    }

    /// Every line of the address is required.
    pub fn check(&self, prefix: &str, errors: &mut ValidationErrors) {
        errors.require_text(&format!("{prefix}.street"), self.street.as_deref());
        errors.require_text(&format!("{prefix}.city"), self.city.as_deref());
        errors.require_text(&format!("{prefix}.state"), self.state.as_deref());
        errors.require_text(&format!("{prefix}.zip"), self.zip.as_deref());
    }
}

#[cfg(test)]
mod tests {
    use super::Address;
    use crate::model::validation::ValidationErrors;

    #[test]
    fn empty_address_fails_every_line() {
        let mut errors = ValidationErrors::new();
        Address::default().check("address", &mut errors);
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn complete_address_passes() {
        let mut errors = ValidationErrors::new();
        Address::new("street", "city", "ST", "12345").check("address", &mut errors);
        assert!(errors.is_empty());
    }
}
