//! User (driver) domain model.

use crate::db::schema::StructuredType;
use crate::model::address::Address;
use crate::model::entity::Entity;
use crate::model::validation::{ValidationErrors, Validator, DATE_FORMAT};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Registered vehicle (`user_car`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Car {
    pub make: String,
    pub model: String,
    pub licence: String,
}

/// Reference to a garage the user bookmarked (`user_favorite_garage`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FavoriteGarage {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cars: Option<Vec<Car>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorite_garages: Option<Vec<FavoriteGarage>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub contact: Option<String>,
    pub email: Option<String>,
    /// Calendar day, `YYYY-MM-DD`; defaults to the creation day.
    pub join_date: String,
    pub avatar: Option<String>,
    pub address: Option<Address>,
    pub cars: Vec<Car>,
    pub favorite_garages: Vec<FavoriteGarage>,
}

impl Entity for User {
    type Input = UserInput;

    const NAME: &'static str = "User";
    const TABLE: &'static str = "user";

    fn structured_types() -> Vec<StructuredType> {
        vec![
            StructuredType::new(
                "user_car",
                &[("make", "text"), ("model", "text"), ("licence", "text")],
            ),
            StructuredType::new("user_favorite_garage", &[("id", "text")]),
        ]
    }

    fn from_input(input: UserInput) -> Self {
        Self {
            id: input.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            first_name: input.first_name,
            last_name: input.last_name,
            contact: input.contact,
            email: input.email,
            join_date: input
                .join_date
                .unwrap_or_else(|| chrono::Utc::now().format(DATE_FORMAT).to_string()),
            avatar: input.avatar,
            address: input.address,
            cars: input.cars.unwrap_or_default(),
            favorite_garages: input.favorite_garages.unwrap_or_default(),
        }
    }

    fn input_id(input: &UserInput) -> Option<&str> {
        input.id.as_deref()
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn seed_fixture() -> &'static str {
        include_str!("../../fixtures/users.json")
    }

    fn default_validator() -> Arc<dyn Validator<Self>> {
        Arc::new(UserValidator)
    }
}

/// Default user rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserValidator;

impl Validator<User> for UserValidator {
    fn validate(&self, user: &User) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.uuid("id", &user.id);
        errors.optional_text("first_name", user.first_name.as_deref());
        errors.optional_text("last_name", user.last_name.as_deref());
        errors.phone("contact", user.contact.as_deref());
        errors.email("email", user.email.as_deref());
        errors.date("join_date", Some(&user.join_date));
        if let Some(address) = &user.address {
            address.check("address", &mut errors);
        }
        for (index, car) in user.cars.iter().enumerate() {
            errors.require_text(&format!("cars[{index}].make"), Some(&car.make));
            errors.require_text(&format!("cars[{index}].model"), Some(&car.model));
            errors.require_text(&format!("cars[{index}].licence"), Some(&car.licence));
        }
        for (index, favorite) in user.favorite_garages.iter().enumerate() {
            errors.require_text(&format!("favorite_garages[{index}].id"), Some(&favorite.id));
        }
        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entity::load_seed;
    use serde_json::json;

    #[test]
    fn defaults_generate_id_and_join_date() {
        let user = User::from_input(UserInput::default());
        assert!(Uuid::parse_str(&user.id).is_ok());
        assert!(chrono::NaiveDate::parse_from_str(&user.join_date, DATE_FORMAT).is_ok());
        assert!(user.cars.is_empty());
        assert!(user.favorite_garages.is_empty());
        assert!(UserValidator.validate(&user).is_ok());
    }

    #[test]
    fn full_input_is_kept_and_valid() {
        let input: UserInput = serde_json::from_value(json!({
            "first_name": "TEST NAME",
            "last_name": "TEST LAST NAME",
            "contact": "(781) 466-4308",
            "email": "test@test.com",
            "address": {
                "street": "TEST STREET",
                "city": "TEST CITY",
                "state": "TD",
                "zip": "00000"
            },
            "cars": [
                {"make": "Honda", "model": "civi", "licence": "tx201"},
                {"make": "Hundai", "model": "sonata", "licence": "tx222"}
            ],
            "favorite_garages": [{"id": "garage-0001"}, {"id": "garage-0002"}]
        }))
        .unwrap();
        let user = User::from_input(input);
        assert_eq!(user.first_name.as_deref(), Some("TEST NAME"));
        assert_eq!(user.cars.len(), 2);
        assert_eq!(user.favorite_garages[0].id, "garage-0001");
        assert!(UserValidator.validate(&user).is_ok());
    }

    #[test]
    fn incomplete_parts_are_rejected() {
        let mut user = User::from_input(UserInput::default());
        user.email = Some("not-an-email".to_string());
        user.address = Some(Address::default());
        user.cars.push(Car::default());
        let errors = UserValidator.validate(&user).unwrap_err();
        assert!(errors.has_path("email"));
        assert!(errors.has_path("address.city"));
        assert!(errors.has_path("cars[0].licence"));
    }

    #[test]
    fn seed_fixture_is_valid() {
        let seed = load_seed::<User>().unwrap();
        assert_eq!(seed.len(), 3);
        for user in &seed {
            assert!(UserValidator.validate(user).is_ok(), "seed user {} invalid", user.id);
        }
    }
}
