//! Process-wide services shared by every request.
//!
//! One [`Services`] value is built with the app and reached from handlers
//! through the [`Context`](crate::context::Context) accessors. Each service is
//! constructed on first use and then shared. Configuration is checked when the
//! app is built, so first-use construction itself cannot fail; using a feature
//! that is switched off yields [`ServiceError::FeatureDisabled`].

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    sync::{Arc, OnceLock},
};

use thiserror::Error;

use crate::cache::{CacheStore, MemoryStore};
use crate::config::{Config, DatabaseConfig};
use crate::events::EventsManager;
use crate::hashing::Hashing;
use crate::jwt::Jwt;
use crate::mail::{LogTransport, MailTransport, Mailer};
use crate::sessions::SessionManager;
use crate::validation::Validator;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{feature} is not enabled")]
    FeatureDisabled { feature: &'static str },

    #[error("no {type_name} was provided at setup")]
    NotProvided { type_name: &'static str },
}

/// A singleton built by `factory` the first time it is asked for.
struct Lazy<T> {
    cell: OnceLock<Arc<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T> Lazy<T> {
    fn get(&self) -> Arc<T> {
        Arc::clone(self.cell.get_or_init(|| Arc::new((self.factory)())))
    }
}

pub struct Services {
    config: Config,
    events: EventsManager,
    validator: Validator,
    jwt: OnceLock<Jwt>,
    cache_store: Option<Arc<dyn CacheStore>>,
    default_cache: OnceLock<Arc<dyn CacheStore>>,
    sessions: OnceLock<SessionManager>,
    mail_transport: Option<Arc<dyn MailTransport>>,
    mailer: OnceLock<Mailer>,
    provided: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Services {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            config,
            events: EventsManager::new(),
            validator: Validator::new(),
            jwt: OnceLock::new(),
            cache_store: None,
            default_cache: OnceLock::new(),
            sessions: OnceLock::new(),
            mail_transport: None,
            mailer: OnceLock::new(),
            provided: HashMap::new(),
        }
    }

    pub(crate) fn with_events(mut self, events: EventsManager) -> Self {
        self.events = events;
        self
    }

    pub(crate) fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub(crate) fn with_mail_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.mail_transport = Some(transport);
        self
    }

    pub(crate) fn provide_lazy<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let lazy = Lazy {
            cell: OnceLock::new(),
            factory: Box::new(factory),
        };
        self.provided.insert(TypeId::of::<T>(), Box::new(lazy));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventsManager {
        &self.events
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn jwt(&self) -> Result<&Jwt, ServiceError> {
        let jwt = &self.config.jwt;
        let secret = match (&jwt.secret, jwt.enabled) {
            (Some(secret), true) => secret,
            _ => return Err(ServiceError::FeatureDisabled { feature: "jwt" }),
        };
        Ok(self.jwt.get_or_init(|| {
            tracing::debug!("initialising JWT facility");
            Jwt::new(secret, jwt.lifespan)
        }))
    }

    /// The plugged-in store, or an in-memory one when caching is enabled
    /// without one.
    pub fn cache(&self) -> Result<Arc<dyn CacheStore>, ServiceError> {
        if let Some(store) = &self.cache_store {
            return Ok(Arc::clone(store));
        }
        if !self.config.cache_enabled {
            return Err(ServiceError::FeatureDisabled { feature: "cache" });
        }
        Ok(Arc::clone(self.default_cache.get_or_init(|| {
            tracing::debug!("initialising in-memory cache store");
            Arc::new(MemoryStore::new())
        })))
    }

    /// Session loading and saving over the plugged-in cache store, or over a
    /// private in-memory store.
    pub fn sessions(&self) -> Result<&SessionManager, ServiceError> {
        if !self.config.session.enabled {
            return Err(ServiceError::FeatureDisabled { feature: "sessions" });
        }
        Ok(self.sessions.get_or_init(|| {
            tracing::debug!("initialising session manager");
            let store = self
                .cache_store
                .clone()
                .unwrap_or_else(|| Arc::new(MemoryStore::new()));
            SessionManager::new(store, &self.config.session)
        }))
    }

    pub fn hashing(&self) -> Hashing {
        Hashing::new(self.config.hashing_cost)
    }

    pub fn mailer(&self) -> Mailer {
        self.mailer
            .get_or_init(|| {
                let transport = self
                    .mail_transport
                    .clone()
                    .unwrap_or_else(|| Arc::new(LogTransport));
                Mailer::new(transport)
            })
            .clone()
    }

    pub fn database(&self) -> Result<&DatabaseConfig, ServiceError> {
        self.config
            .database
            .as_ref()
            .ok_or(ServiceError::FeatureDisabled { feature: "database" })
    }

    /// The singleton of type `T` registered at setup, built on first call.
    pub fn resolve<T>(&self) -> Result<Arc<T>, ServiceError>
    where
        T: Send + Sync + 'static,
    {
        self.provided
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast_ref::<Lazy<T>>())
            .map(Lazy::get)
            .ok_or(ServiceError::NotProvided {
                type_name: type_name::<T>(),
            })
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("config", &self.config)
            .field("provided", &self.provided.len())
            .finish_non_exhaustive()
    }
}
