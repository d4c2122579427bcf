//! Named events and the jobs that react to them.
//!
//! Jobs are registered by event name during setup. Handlers fire events through
//! [`Context::fire`](crate::context::Context::fire); the dispatcher runs the
//! jobs after the chain has completed, with the same request context. Jobs
//! cannot fire further events, so one request dispatches one bounded batch.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use serde_json::Value;
use thiserror::Error;

use crate::context::Context;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("event name is empty")]
    EmptyName,

    #[error("event {name:?} is not registered")]
    Unregistered { name: String },

    #[error("event {name:?} was fired from an event job")]
    FiredFromJob { name: String },
}

/// A named occurrence with an arbitrary JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub payload: Value,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

pub type JobFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A reaction to an event. Receives the event and the request's context.
pub type Job =
    Arc<dyn for<'a> Fn(&'a Event, &'a mut Context) -> JobFuture<'a> + Send + Sync + 'static>;

/// Registry of event names and their jobs, frozen once the app is built.
#[derive(Clone, Default)]
pub struct EventsManager {
    jobs: HashMap<String, Vec<Job>>,
}

impl EventsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `job` to the jobs of `name`, registering the name if needed.
    pub fn register<F>(&mut self, name: impl Into<String>, job: F) -> Result<(), EventError>
    where
        F: for<'a> Fn(&'a Event, &'a mut Context) -> JobFuture<'a> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(EventError::EmptyName);
        }
        self.jobs.entry(name).or_default().push(Arc::new(job));
        Ok(())
    }

    /// Whether an event named `name` may be fired.
    pub fn check(&self, name: &str) -> Result<(), EventError> {
        if name.is_empty() {
            return Err(EventError::EmptyName);
        }
        if !self.jobs.contains_key(name) {
            return Err(EventError::Unregistered {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    /// The jobs registered for `name`, in registration order.
    pub fn jobs(&self, name: &str) -> Vec<Job> {
        self.jobs.get(name).cloned().unwrap_or_default()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }
}
