//! Endpoint registry: (method, path) -> endpoint descriptor, declared through mounts at startup.

use crate::case::{pluralize, to_snake_case};
use crate::config::ApiConfig;
use crate::error::ConfigError;
use axum::http::Method;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Whether an endpoint's action runs against the resource type or a loaded instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchScope {
    ClassLevel,
    InstanceLevel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub method: Method,
    /// Full path: mount path joined with the endpoint path.
    pub path: String,
    pub resource_type: String,
    pub action: String,
    pub scope: DispatchScope,
    /// Allocate a blank instance when no `id` is given (create-through-update).
    pub instantiate_if_missing: bool,
    pub name: String,
}

/// Per-endpoint options given to [`EndpointBuilder`].
#[derive(Clone, Debug)]
pub struct EndpointOptions {
    action: String,
    scope: DispatchScope,
    instantiate_if_missing: bool,
    name: Option<String>,
}

impl EndpointOptions {
    pub fn class_action(action: impl Into<String>) -> Self {
        EndpointOptions {
            action: action.into(),
            scope: DispatchScope::ClassLevel,
            instantiate_if_missing: false,
            name: None,
        }
    }

    pub fn action(action: impl Into<String>) -> Self {
        EndpointOptions {
            action: action.into(),
            scope: DispatchScope::InstanceLevel,
            instantiate_if_missing: false,
            name: None,
        }
    }

    pub fn instantiate_if_missing(mut self) -> Self {
        self.instantiate_if_missing = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

fn join_path(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return if base.is_empty() { "/".into() } else { base.to_string() };
    }
    format!("{}/{}", base, path)
}

/// Endpoints declared under one mount path; registered together when the mount closes.
pub struct EndpointMount {
    path: String,
    index_action: String,
    save_action: String,
    delete_action: String,
    pending: Vec<EndpointDescriptor>,
}

impl EndpointMount {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Endpoints for one resource type. With `crud`, also adds:
    /// `GET <plural>` (class index), `POST <singular>` (save, instantiating), `DELETE <singular>`.
    pub fn model_endpoints_for<F>(&mut self, model: &str, crud: bool, f: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut EndpointBuilder<'_>) -> Result<(), ConfigError>,
    {
        let singular = to_snake_case(model);
        let plural = pluralize(&singular);
        let index = EndpointOptions::class_action(self.index_action.clone());
        let save = EndpointOptions::action(self.save_action.clone()).instantiate_if_missing();
        let delete = EndpointOptions::action(self.delete_action.clone());
        let mut builder = EndpointBuilder {
            mount: self,
            resource_type: model.to_string(),
        };
        if crud {
            builder.get(&plural, index);
            builder.post(&singular, save);
            builder.delete(&singular, delete);
        }
        f(&mut builder)
    }
}

pub struct EndpointBuilder<'m> {
    mount: &'m mut EndpointMount,
    resource_type: String,
}

impl EndpointBuilder<'_> {
    pub fn get(&mut self, path: &str, opts: EndpointOptions) -> &mut Self {
        self.add_endpoint(Method::GET, path, opts)
    }

    pub fn post(&mut self, path: &str, opts: EndpointOptions) -> &mut Self {
        self.add_endpoint(Method::POST, path, opts)
    }

    pub fn delete(&mut self, path: &str, opts: EndpointOptions) -> &mut Self {
        self.add_endpoint(Method::DELETE, path, opts)
    }

    pub fn add_endpoint(&mut self, method: Method, path: &str, opts: EndpointOptions) -> &mut Self {
        let name = opts.name.unwrap_or_else(|| match opts.scope {
            DispatchScope::ClassLevel => format!("{}::{}", self.resource_type, opts.action),
            DispatchScope::InstanceLevel => format!("{}#{}", self.resource_type, opts.action),
        });
        self.mount.pending.push(EndpointDescriptor {
            method,
            path: join_path(&self.mount.path, path),
            resource_type: self.resource_type.clone(),
            action: opts.action,
            scope: opts.scope,
            instantiate_if_missing: opts.instantiate_if_missing,
            name,
        });
        self
    }
}

/// Append-only at startup; read-only while serving.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    by_key: HashMap<(Method, String), Arc<EndpointDescriptor>>,
    ordered: Vec<Arc<EndpointDescriptor>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: EndpointDescriptor) -> Result<(), ConfigError> {
        let key = (descriptor.method.clone(), descriptor.path.clone());
        if self.by_key.contains_key(&key) {
            return Err(ConfigError::DuplicateEndpoint {
                method: key.0,
                path: key.1,
            });
        }
        let descriptor = Arc::new(descriptor);
        self.by_key.insert(key, descriptor.clone());
        self.ordered.push(descriptor);
        Ok(())
    }

    /// Declare endpoints under `path`. Nothing is registered if the closure fails.
    pub fn mount<F>(&mut self, path: &str, config: &ApiConfig, f: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut EndpointMount) -> Result<(), ConfigError>,
    {
        let mut mount = EndpointMount {
            path: path.to_string(),
            index_action: config.default_index_action.clone(),
            save_action: config.default_save_action.clone(),
            delete_action: config.default_delete_action.clone(),
            pending: Vec::new(),
        };
        f(&mut mount)?;
        let mut seen = HashSet::new();
        for descriptor in &mount.pending {
            let key = (descriptor.method.clone(), descriptor.path.clone());
            if self.by_key.contains_key(&key) || !seen.insert(key) {
                return Err(ConfigError::DuplicateEndpoint {
                    method: descriptor.method.clone(),
                    path: descriptor.path.clone(),
                });
            }
        }
        for descriptor in mount.pending {
            self.register(descriptor)?;
        }
        Ok(())
    }

    pub fn lookup(&self, method: &Method, path: &str) -> Option<&EndpointDescriptor> {
        self.by_key
            .get(&(method.clone(), path.to_string()))
            .map(|d| d.as_ref())
    }

    /// Endpoints in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.ordered.iter().map(|d| d.as_ref())
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(method: Method, path: &str) -> EndpointDescriptor {
        EndpointDescriptor {
            method,
            path: path.into(),
            resource_type: "User".into(),
            action: "index".into(),
            scope: DispatchScope::ClassLevel,
            instantiate_if_missing: false,
            name: "User::index".into(),
        }
    }

    #[test]
    fn lookup_returns_registered_descriptor() {
        let mut reg = EndpointRegistry::new();
        reg.register(descriptor(Method::GET, "/api/v1/users")).unwrap();
        reg.register(descriptor(Method::POST, "/api/v1/users")).unwrap();
        assert_eq!(
            reg.lookup(&Method::GET, "/api/v1/users"),
            Some(&descriptor(Method::GET, "/api/v1/users"))
        );
        assert_eq!(reg.lookup(&Method::POST, "/api/v1/users").unwrap().method, Method::POST);
        assert!(reg.lookup(&Method::DELETE, "/api/v1/users").is_none());
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut reg = EndpointRegistry::new();
        reg.register(descriptor(Method::GET, "/users")).unwrap();
        let err = reg.register(descriptor(Method::GET, "/users")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateEndpoint { .. }));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn model_endpoints_for_adds_crud_and_custom() {
        let mut reg = EndpointRegistry::new();
        reg.mount("/api/v1", &ApiConfig::default(), |m| {
            m.model_endpoints_for("User", true, |ep| {
                ep.post("/users/do_something", EndpointOptions::class_action("do_something"));
                Ok(())
            })
        })
        .unwrap();

        let index = reg.lookup(&Method::GET, "/api/v1/users").unwrap();
        assert_eq!(index.action, "index");
        assert_eq!(index.scope, DispatchScope::ClassLevel);
        assert_eq!(index.name, "User::index");

        let save = reg.lookup(&Method::POST, "/api/v1/user").unwrap();
        assert_eq!(save.action, "update");
        assert!(save.instantiate_if_missing);
        assert_eq!(save.name, "User#update");

        let delete = reg.lookup(&Method::DELETE, "/api/v1/user").unwrap();
        assert_eq!(delete.action, "delete");
        assert!(!delete.instantiate_if_missing);

        let custom = reg.lookup(&Method::POST, "/api/v1/users/do_something").unwrap();
        assert_eq!(custom.name, "User::do_something");
        assert_eq!(reg.iter().count(), 4);
    }

    #[test]
    fn failed_mount_registers_nothing() {
        let mut reg = EndpointRegistry::new();
        let res = reg.mount("/api", &ApiConfig::default(), |m| {
            m.model_endpoints_for("Post", true, |_| Err(ConfigError::MissingScope("Post".into())))
        });
        assert!(res.is_err());
        assert!(reg.is_empty());
    }

    #[test]
    fn mount_with_a_clash_registers_nothing() {
        let mut reg = EndpointRegistry::new();
        reg.register(descriptor(Method::DELETE, "/api/post")).unwrap();

        // GET and POST come before the clashing DELETE
        let res = reg.mount("/api", &ApiConfig::default(), |m| m.model_endpoints_for("Post", true, |_| Ok(())));
        assert!(matches!(res, Err(ConfigError::DuplicateEndpoint { .. })));
        assert_eq!(reg.len(), 1);
        assert!(reg.lookup(&Method::GET, "/api/posts").is_none());

        let res = reg.mount("/api", &ApiConfig::default(), |m| {
            m.model_endpoints_for("Comment", false, |ep| {
                ep.get("/comments", EndpointOptions::class_action("index"));
                ep.get("/comments", EndpointOptions::class_action("search"));
                Ok(())
            })
        });
        assert!(res.is_err());
        assert_eq!(reg.len(), 1);
    }
}
