//! Entity resolution index: the single arbiter of membership-number
//! uniqueness within a run, and the lookup table dependent cleaners
//! use to attach rows to customers.
//!
//! Holds one run's worth of customers in memory; nothing accumulates
//! across runs.

use std::collections::HashMap;

use crate::error::ReasonCode;
use crate::models::CanonicalCustomer;

#[derive(Debug, Default)]
pub struct CustomerIndex {
    customers: HashMap<String, CanonicalCustomer>,
}

impl CustomerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    pub fn contains(&self, membership_number: &str) -> bool {
        self.customers.contains_key(membership_number)
    }

    pub fn get(&self, membership_number: &str) -> Option<&CanonicalCustomer> {
        self.customers.get(membership_number)
    }

    /// First occurrence wins; a colliding key is rejected, never
    /// silently overwritten.
    pub fn insert(&mut self, customer: CanonicalCustomer) -> Result<(), ReasonCode> {
        if self.customers.contains_key(&customer.membership_number) {
            return Err(ReasonCode::DuplicateKey);
        }
        self.customers
            .insert(customer.membership_number.clone(), customer);
        Ok(())
    }

    /// All accepted customers, key-sorted for deterministic upload
    /// order.
    pub fn sorted(&self) -> Vec<CanonicalCustomer> {
        let mut customers: Vec<CanonicalCustomer> = self.customers.values().cloned().collect();
        customers.sort_by(|a, b| a.membership_number.cmp(&b.membership_number));
        customers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gender::Gender;

    fn customer(membership: &str) -> CanonicalCustomer {
        CanonicalCustomer {
            membership_number: membership.to_string(),
            name: "Test".to_string(),
            gender: Gender::Unknown,
            phone: None,
            email: None,
            address: String::new(),
            city: String::new(),
            state: String::new(),
            postcode: None,
            country: "Malaysia".to_string(),
            date_of_birth: None,
            registration_date: None,
            total_spending: 0.0,
            visit_count: 0,
            last_visit_date: None,
        }
    }

    #[test]
    fn first_insert_wins_second_is_rejected() {
        let mut index = CustomerIndex::new();
        assert!(index.insert(customer("M001")).is_ok());
        assert_eq!(
            index.insert(customer("M001")),
            Err(ReasonCode::DuplicateKey)
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn lookups_see_accepted_customers() {
        let mut index = CustomerIndex::new();
        index.insert(customer("M002")).unwrap();
        assert!(index.contains("M002"));
        assert!(!index.contains("M003"));
        assert_eq!(index.get("M002").unwrap().membership_number, "M002");
    }

    #[test]
    fn sorted_is_key_ordered() {
        let mut index = CustomerIndex::new();
        for key in ["M010", "M002", "M007"] {
            index.insert(customer(key)).unwrap();
        }
        let sorted = index.sorted();
        let keys: Vec<&str> = sorted.iter().map(|c| c.membership_number.as_str()).collect();
        assert_eq!(keys, vec!["M002", "M007", "M010"]);
    }
}
