//! Radix route table for one application.
//!
//! Built from the method infos of every resource bound to the application,
//! once per register/reload. Lookup is O(k) in the number of path segments.
//!
//! - Static segments (`users`) match exactly and win over parameters
//! - Parameter segments (`{id}`) match any single segment
//! - Routes are stored at terminal nodes, keyed by HTTP method
//!
//! Two resources declaring the same method and pattern conflict; the first
//! inserted keeps the route.

use crate::handler::ParamVec;
use crate::service::Resource;
use http::Method;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// What a matched route dispatches to.
pub struct RouteTarget {
    /// Name of the resource provider
    pub resource: Arc<str>,
    /// Operation name handed back to [`Resource::handle`]
    pub operation: Arc<str>,
    /// Full pattern below the application base, e.g. `/users/{id}`
    pub pattern: String,
    pub instance: Arc<dyn Resource>,
}

impl fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTarget")
            .field("resource", &self.resource)
            .field("operation", &self.operation)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RadixNode {
    segment: String,
    routes: HashMap<Method, Arc<RouteTarget>>,
    /// `Some` for parameter nodes (`{id}` → `id`)
    param_name: Option<Arc<str>>,
    children: Vec<RadixNode>,
    /// Several parameter names may share a position
    /// (`/users/{id}/posts` and `/users/{user_id}/comments`).
    param_children: Vec<RadixNode>,
}

impl RadixNode {
    fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            ..Self::default()
        }
    }

    fn new_param(name: &str) -> Self {
        Self {
            param_name: Some(Arc::from(name)),
            ..Self::default()
        }
    }

    /// Returns `false` if the method/pattern was already taken.
    fn insert(&mut self, segments: &[&str], method: Method, route: Arc<RouteTarget>) -> bool {
        let Some((&segment, remaining)) = segments.split_first() else {
            if self.routes.contains_key(&method) {
                return false;
            }
            self.routes.insert(method, route);
            return true;
        };

        if let Some(param) = segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
        {
            if let Some(child) = self
                .param_children
                .iter_mut()
                .find(|c| c.param_name.as_deref() == Some(param))
            {
                return child.insert(remaining, method, route);
            }
            let mut child = RadixNode::new_param(param);
            let inserted = child.insert(remaining, method, route);
            self.param_children.push(child);
            return inserted;
        }

        if let Some(child) = self.children.iter_mut().find(|c| c.segment == segment) {
            return child.insert(remaining, method, route);
        }
        let mut child = RadixNode::new(segment);
        let inserted = child.insert(remaining, method, route);
        self.children.push(child);
        inserted
    }

    fn search(
        &self,
        segments: &[&str],
        method: &Method,
        params: &mut ParamVec,
    ) -> Option<Arc<RouteTarget>> {
        let Some((&segment, remaining)) = segments.split_first() else {
            return self.routes.get(method).map(Arc::clone);
        };

        for child in &self.children {
            if child.segment == segment {
                if let Some(route) = child.search(remaining, method, params) {
                    return Some(route);
                }
            }
        }

        for child in &self.param_children {
            if let Some(name) = &child.param_name {
                params.push((Arc::clone(name), segment.to_string()));
                if let Some(route) = child.search(remaining, method, params) {
                    return Some(route);
                }
                params.pop();
            }
        }

        None
    }

    fn count(&self) -> usize {
        self.routes.len()
            + self.children.iter().map(RadixNode::count).sum::<usize>()
            + self.param_children.iter().map(RadixNode::count).sum::<usize>()
    }
}

/// Route table of one application.
#[derive(Default)]
pub struct RouteTable {
    root: RadixNode,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route. Returns `false` (and logs) on a method/pattern conflict.
    pub fn insert(&mut self, method: Method, target: RouteTarget) -> bool {
        let pattern = target.pattern.clone();
        let resource = Arc::clone(&target.resource);
        let inserted = self
            .root
            .insert(&split(&pattern), method.clone(), Arc::new(target));
        if !inserted {
            warn!(
                method = %method,
                pattern = %pattern,
                resource = %resource,
                "Route already taken by another resource"
            );
        }
        inserted
    }

    /// Match a request path (relative to the application base).
    #[must_use]
    pub fn route(&self, method: &Method, path: &str) -> Option<(Arc<RouteTarget>, ParamVec)> {
        let mut params = ParamVec::new();
        let target = self.root.search(&split(path), method, &mut params)?;
        Some((target, params))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.root.count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerRequest, HandlerResponse};
    use crate::service::ResourceDescriptor;

    struct Noop;

    impl Resource for Noop {
        fn descriptor(&self) -> ResourceDescriptor {
            ResourceDescriptor::default()
        }

        fn handle(&self, _operation: &str, _req: &HandlerRequest) -> HandlerResponse {
            HandlerResponse::json(200, serde_json::Value::Null)
        }
    }

    fn target(resource: &str, operation: &str, pattern: &str) -> RouteTarget {
        RouteTarget {
            resource: Arc::from(resource),
            operation: Arc::from(operation),
            pattern: pattern.to_string(),
            instance: Arc::new(Noop),
        }
    }

    fn table(routes: &[(Method, &str, &str)]) -> RouteTable {
        let mut t = RouteTable::new();
        for (method, pattern, op) in routes {
            t.insert(method.clone(), target("r", op, pattern));
        }
        t
    }

    fn param<'a>(params: &'a ParamVec, name: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_static_and_parameter_routes() {
        let t = table(&[
            (Method::GET, "/users", "list"),
            (Method::GET, "/users/{id}", "get"),
            (Method::GET, "/users/{id}/posts", "posts"),
        ]);
        assert_eq!(t.len(), 3);
        assert_eq!(&*t.route(&Method::GET, "/users").unwrap().0.operation, "list");
        let (route, params) = t.route(&Method::GET, "/users/42").unwrap();
        assert_eq!(&*route.operation, "get");
        assert_eq!(param(&params, "id"), Some("42"));
        assert_eq!(
            &*t.route(&Method::GET, "/users/42/posts").unwrap().0.operation,
            "posts"
        );
        assert!(t.route(&Method::GET, "/posts").is_none());
    }

    #[test]
    fn test_method_filtering() {
        let t = table(&[(Method::GET, "/items", "get"), (Method::POST, "/items", "post")]);
        assert_eq!(&*t.route(&Method::POST, "/items").unwrap().0.operation, "post");
        assert!(t.route(&Method::PUT, "/items").is_none());
    }

    #[test]
    fn test_different_param_names_at_same_position() {
        let t = table(&[
            (Method::GET, "/users/{user_id}/posts", "posts"),
            (Method::GET, "/users/{id}/comments", "comments"),
        ]);
        let (_, params) = t.route(&Method::GET, "/users/1/posts").unwrap();
        assert_eq!(param(&params, "user_id"), Some("1"));
        assert!(param(&params, "id").is_none());
        let (_, params) = t.route(&Method::GET, "/users/2/comments").unwrap();
        assert_eq!(param(&params, "id"), Some("2"));
        assert!(param(&params, "user_id").is_none());
    }

    #[test]
    fn test_root_route_and_conflicts() {
        let mut t = RouteTable::new();
        assert!(t.insert(Method::GET, target("a", "root", "")));
        assert!(!t.insert(Method::GET, target("b", "root", "/")));
        let (route, _) = t.route(&Method::GET, "/").unwrap();
        assert_eq!(&*route.resource, "a");
    }
}
