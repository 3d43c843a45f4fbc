//! Process-wide registry: filled once at startup through [`RegistryBuilder`], read-only while serving.

use crate::config::ApiConfig;
use crate::documentation::{ApiDoc, DocRegistry};
use crate::endpoints::{EndpointMount, EndpointRegistry};
use crate::error::{ApiError, ConfigError};
use crate::logging::ErrorReporter;
use crate::responder::{ActionSet, MissingScope, ScopeProvider};
use crate::serializer::{Serializer, SerializerRegistry};
use crate::store::{AllowAll, Authorizer, Transactor};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Registry {
    config: ApiConfig,
    endpoints: EndpointRegistry,
    docs: DocRegistry,
    serializers: SerializerRegistry,
    scopes: HashMap<String, Arc<dyn ScopeProvider>>,
    actions: HashMap<String, ActionSet>,
    authorizer: Arc<dyn Authorizer>,
    transactor: Option<Arc<dyn Transactor>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
}

impl Registry {
    pub fn builder(config: ApiConfig) -> RegistryBuilder {
        RegistryBuilder::new(config)
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    pub fn docs(&self) -> &DocRegistry {
        &self.docs
    }

    pub fn serializers(&self) -> &SerializerRegistry {
        &self.serializers
    }

    /// Registered provider for the type; types without one fail when their scope is first needed.
    pub fn scope_provider(&self, resource_type: &str) -> Arc<dyn ScopeProvider> {
        match self.scopes.get(resource_type) {
            Some(provider) => provider.clone(),
            None => Arc::new(MissingScope(resource_type.to_string())),
        }
    }

    pub fn actions(&self, resource_type: &str) -> Option<&ActionSet> {
        self.actions.get(resource_type)
    }

    pub fn authorizer(&self) -> &dyn Authorizer {
        self.authorizer.as_ref()
    }

    pub fn transactor(&self) -> Result<&dyn Transactor, ApiError> {
        self.transactor
            .as_deref()
            .ok_or_else(|| ConfigError::MissingTransactor.into())
    }

    pub fn reporter(&self) -> Option<&dyn ErrorReporter> {
        self.reporter.as_deref()
    }
}

pub struct RegistryBuilder {
    config: ApiConfig,
    endpoints: EndpointRegistry,
    docs: DocRegistry,
    serializers: SerializerRegistry,
    scopes: HashMap<String, Arc<dyn ScopeProvider>>,
    actions: HashMap<String, ActionSet>,
    authorizer: Arc<dyn Authorizer>,
    transactor: Option<Arc<dyn Transactor>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
}

impl RegistryBuilder {
    pub fn new(config: ApiConfig) -> Self {
        RegistryBuilder {
            config,
            endpoints: EndpointRegistry::new(),
            docs: DocRegistry::new(),
            serializers: SerializerRegistry::new(),
            scopes: HashMap::new(),
            actions: HashMap::new(),
            authorizer: Arc::new(AllowAll),
            transactor: None,
            reporter: None,
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn mount<F>(&mut self, path: &str, f: F) -> Result<&mut Self, ConfigError>
    where
        F: FnOnce(&mut EndpointMount) -> Result<(), ConfigError>,
    {
        self.endpoints.mount(path, &self.config, f)?;
        Ok(self)
    }

    pub fn doc(&mut self, doc: ApiDoc) -> Result<&mut Self, ConfigError> {
        self.docs.register(doc)?;
        Ok(self)
    }

    pub fn docs_mut(&mut self) -> &mut DocRegistry {
        &mut self.docs
    }

    pub fn serializer(&mut self, serializer: Serializer) -> Result<&mut Self, ConfigError> {
        self.serializers.register(serializer)?;
        Ok(self)
    }

    pub fn scope_provider(
        &mut self,
        resource_type: &str,
        provider: Arc<dyn ScopeProvider>,
    ) -> Result<&mut Self, ConfigError> {
        if self.scopes.contains_key(resource_type) {
            return Err(ConfigError::DuplicateRegistration {
                kind: "scope responder",
                resource: resource_type.to_string(),
            });
        }
        self.scopes.insert(resource_type.to_string(), provider);
        Ok(self)
    }

    pub fn actions(&mut self, resource_type: &str, actions: ActionSet) -> Result<&mut Self, ConfigError> {
        if self.actions.contains_key(resource_type) {
            return Err(ConfigError::DuplicateRegistration {
                kind: "action responder",
                resource: resource_type.to_string(),
            });
        }
        self.actions.insert(resource_type.to_string(), actions);
        Ok(self)
    }

    pub fn authorizer(&mut self, authorizer: Arc<dyn Authorizer>) -> &mut Self {
        self.authorizer = authorizer;
        self
    }

    pub fn transactor(&mut self, transactor: Arc<dyn Transactor>) -> &mut Self {
        self.transactor = Some(transactor);
        self
    }

    pub fn reporter(&mut self, reporter: Arc<dyn ErrorReporter>) -> &mut Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn build(self) -> Arc<Registry> {
        tracing::debug!(
            endpoints = self.endpoints.len(),
            docs = self.docs.len(),
            "api registry built"
        );
        Arc::new(Registry {
            config: self.config,
            endpoints: self.endpoints,
            docs: self.docs,
            serializers: self.serializers,
            scopes: self.scopes,
            actions: self.actions,
            authorizer: self.authorizer,
            transactor: self.transactor,
            reporter: self.reporter,
        })
    }
}
