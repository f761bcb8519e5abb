//! Charity registration

use std::sync::Arc;

use uuid::Uuid;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::{Error, Result};
use crate::domain::{Charity, NewCharity};

pub struct CharityService {
    repository: Arc<DuckDbRepository>,
}

impl CharityService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Validate and store a new charity
    pub fn register(&self, request: NewCharity) -> Result<Charity> {
        let charity = request.into_charity()?;
        self.repository.insert_charity(&charity)?;
        Ok(charity)
    }

    pub fn list(&self) -> Result<Vec<Charity>> {
        Ok(self.repository.list_charities()?)
    }

    pub fn get(&self, id: Uuid) -> Result<Charity> {
        self.repository
            .get_charity(id)?
            .ok_or_else(|| Error::not_found(format!("charity {}", id)))
    }
}
