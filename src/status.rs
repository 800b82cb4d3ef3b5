//! # Status Reporting
//!
//! Pure projection of dispatcher state into serializable DTOs.
//!
//! Every provider the whiteboard is responsible for shows up exactly once:
//! either as a success descriptor (applications at the top level, their
//! resources and extensions nested inside) or as a failed descriptor carrying
//! the failure reason. The default application has its own slot.
//!
//! Content that matches no application and providers targeting another
//! whiteboard are not reported.

use crate::ids::ServiceId;
use crate::properties::keys;
use crate::provider::{AnyProvider, ApplicationProvider, FailureReason};
use crate::runtime::{BoundExtension, BoundResource, ResolvedApplication};
use crate::service::MethodInfo;
use serde::Serialize;
use std::sync::Arc;

/// Input to [`project`]: what a dispatcher currently serves and what failed.
#[derive(Debug, Default, Clone)]
pub struct StatusSnapshot {
    pub urls: Vec<String>,
    pub applications: Vec<DeployedView>,
    pub failed: Vec<FailedView>,
}

/// A registered application with the configuration it is serving.
#[derive(Debug, Clone)]
pub struct DeployedView {
    pub application: Arc<ApplicationProvider>,
    pub resolved: ResolvedApplication,
}

#[derive(Debug, Clone)]
pub struct FailedView {
    pub provider: AnyProvider,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceMethodInfoDto {
    pub method: String,
    pub path: String,
    pub operation: String,
    pub consumes: Vec<String>,
    pub produces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDto {
    pub name: String,
    pub service_id: ServiceId,
    pub path: String,
    pub resource_methods: Vec<ResourceMethodInfoDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionDto {
    pub name: String,
    pub service_id: ServiceId,
    pub extension_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationDto {
    pub name: String,
    pub base: String,
    pub service_id: ServiceId,
    pub resource_dtos: Vec<ResourceDto>,
    pub extension_dtos: Vec<ExtensionDto>,
    /// Every method of every resource, with full paths below the base
    pub resource_methods: Vec<ResourceMethodInfoDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedApplicationDto {
    pub name: String,
    pub base: Option<String>,
    pub service_id: ServiceId,
    pub failure_reason: FailureReason,
    pub failure_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedResourceDto {
    pub name: String,
    pub service_id: ServiceId,
    pub failure_reason: FailureReason,
    pub failure_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedExtensionDto {
    pub name: String,
    pub service_id: ServiceId,
    pub failure_reason: FailureReason,
    pub failure_code: i32,
}

/// Status of one whiteboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeDto {
    pub urls: Vec<String>,
    pub default_application: Option<ApplicationDto>,
    pub application_dtos: Vec<ApplicationDto>,
    pub failed_application_dtos: Vec<FailedApplicationDto>,
    pub failed_resource_dtos: Vec<FailedResourceDto>,
    pub failed_extension_dtos: Vec<FailedExtensionDto>,
}

impl RuntimeDto {
    /// Find a served application by name, including the default slot.
    #[must_use]
    pub fn application(&self, name: &str) -> Option<&ApplicationDto> {
        self.default_application
            .iter()
            .chain(self.application_dtos.iter())
            .find(|a| a.name == name)
    }
}

/// Project a snapshot into DTOs.
#[must_use]
pub fn project(snapshot: &StatusSnapshot) -> RuntimeDto {
    let mut dto = RuntimeDto {
        urls: snapshot.urls.clone(),
        ..RuntimeDto::default()
    };

    for view in &snapshot.applications {
        let app = application_dto(view);
        if view.application.is_default() {
            dto.default_application = Some(app);
        } else {
            dto.application_dtos.push(app);
        }
    }
    dto.application_dtos.sort_by(|a, b| a.name.cmp(&b.name));

    for failed in &snapshot.failed {
        let reason = failed.reason;
        match &failed.provider {
            AnyProvider::Application(p) => dto.failed_application_dtos.push(FailedApplicationDto {
                name: p.name().to_string(),
                base: p
                    .properties()
                    .get(keys::APPLICATION_BASE)
                    .map(ToString::to_string),
                service_id: p.id(),
                failure_reason: reason,
                failure_code: reason.code(),
            }),
            AnyProvider::Resource(p) => dto.failed_resource_dtos.push(FailedResourceDto {
                name: p.name().to_string(),
                service_id: p.id(),
                failure_reason: reason,
                failure_code: reason.code(),
            }),
            AnyProvider::Extension(p) => dto.failed_extension_dtos.push(FailedExtensionDto {
                name: p.name().to_string(),
                service_id: p.id(),
                failure_reason: reason,
                failure_code: reason.code(),
            }),
        }
    }
    dto.failed_application_dtos
        .sort_by_key(|d| (d.service_id, d.name.clone()));
    dto.failed_resource_dtos
        .sort_by_key(|d| (d.service_id, d.name.clone()));
    dto.failed_extension_dtos
        .sort_by_key(|d| (d.service_id, d.name.clone()));
    dto
}

fn application_dto(view: &DeployedView) -> ApplicationDto {
    let resolved = &view.resolved;
    let resource_dtos: Vec<ResourceDto> = resolved.resources.iter().map(resource_dto).collect();
    let resource_methods = resolved
        .resources
        .iter()
        .flat_map(|r| r.methods.iter().map(move |m| method_dto(&r.path, m)))
        .collect();
    ApplicationDto {
        name: view.application.name().to_string(),
        base: view.application.base_path().to_string(),
        service_id: view.application.id(),
        resource_dtos,
        extension_dtos: resolved.extensions.iter().map(extension_dto).collect(),
        resource_methods,
    }
}

fn resource_dto(resource: &BoundResource) -> ResourceDto {
    ResourceDto {
        name: resource.name.clone(),
        service_id: resource.service_id,
        path: if resource.path.is_empty() {
            "/".to_string()
        } else {
            resource.path.clone()
        },
        resource_methods: resource
            .methods
            .iter()
            .map(|m| method_dto(&resource.path, m))
            .collect(),
    }
}

fn extension_dto(extension: &BoundExtension) -> ExtensionDto {
    ExtensionDto {
        name: extension.name.clone(),
        service_id: extension.service_id,
        extension_types: extension.extension_types.clone(),
    }
}

fn method_dto(resource_path: &str, method: &MethodInfo) -> ResourceMethodInfoDto {
    let path = format!("{resource_path}{}", method.path);
    ResourceMethodInfoDto {
        method: method.method.as_str().to_string(),
        path: if path.is_empty() { "/".to_string() } else { path },
        operation: method.operation.clone(),
        consumes: method.consumes.clone(),
        produces: method.produces.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerRequest, HandlerResponse};
    use crate::properties::Properties;
    use crate::provider::{validate_application, ServiceReference};
    use crate::service::{Resource, ResourceDescriptor, ServiceObject};
    use http::Method;

    struct Hello;

    impl Resource for Hello {
        fn descriptor(&self) -> ResourceDescriptor {
            ResourceDescriptor::at("/hello")
        }

        fn handle(&self, _operation: &str, _req: &HandlerRequest) -> HandlerResponse {
            HandlerResponse::json(200, serde_json::json!("hello"))
        }
    }

    fn application(id: i64, name: &str, base: &str) -> Arc<ApplicationProvider> {
        let reference = ServiceReference::new(
            id,
            Properties::new()
                .with(keys::NAME, name)
                .with(keys::APPLICATION_BASE, base),
            ServiceObject::None,
        );
        Arc::new(validate_application(&reference, name.to_string()))
    }

    fn deployed(app: &Arc<ApplicationProvider>, resources: Vec<BoundResource>) -> DeployedView {
        DeployedView {
            application: Arc::clone(app),
            resolved: ResolvedApplication {
                name: app.name().to_string(),
                service_id: app.id(),
                base_path: app.base_path().to_string(),
                properties: app.properties().clone(),
                resources,
                extensions: Vec::new(),
            },
        }
    }

    #[test]
    fn test_default_application_has_its_own_slot() {
        let default = application(1, ".default", "/");
        let hello = BoundResource {
            name: "hello".to_string(),
            service_id: ServiceId(2),
            path: "/hello".to_string(),
            methods: vec![MethodInfo::new(Method::GET, "", "hello").produces("text/plain")],
            instance: Arc::new(Hello),
        };
        let snapshot = StatusSnapshot {
            urls: vec!["http://localhost:8080/".to_string()],
            applications: vec![deployed(&default, vec![hello])],
            failed: Vec::new(),
        };

        let dto = project(&snapshot);
        assert!(dto.application_dtos.is_empty());
        let default = dto.default_application.as_ref().unwrap();
        assert_eq!(default.base, "/*");
        assert_eq!(default.resource_dtos.len(), 1);
        assert_eq!(default.resource_dtos[0].path, "/hello");
        assert_eq!(default.resource_methods[0].method, "GET");
        assert_eq!(default.resource_methods[0].path, "/hello");
        assert!(dto.application(".default").is_some());
    }

    #[test]
    fn test_failed_descriptors_carry_reason_and_code() {
        let a = application(1, "a", "/a");
        let b = application(2, "a", "/b");
        let snapshot = StatusSnapshot {
            urls: Vec::new(),
            applications: vec![deployed(&a, Vec::new())],
            failed: vec![FailedView {
                provider: AnyProvider::Application(Arc::clone(&b)),
                reason: FailureReason::ValidationFailed,
            }],
        };

        let dto = project(&snapshot);
        assert_eq!(dto.application_dtos.len(), 1);
        assert_eq!(dto.application_dtos[0].base, "/a/*");
        assert_eq!(dto.failed_application_dtos.len(), 1);
        let failed = &dto.failed_application_dtos[0];
        assert_eq!(failed.service_id, ServiceId(2));
        assert_eq!(failed.base.as_deref(), Some("/b"));
        assert_eq!(failed.failure_code, 3);

        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(
            json["failed_application_dtos"][0]["failure_reason"],
            "VALIDATION_FAILED"
        );
    }
}
