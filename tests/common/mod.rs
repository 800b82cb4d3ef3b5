#![allow(dead_code)]

pub mod test_server {
    use std::sync::Once;

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }

    /// A port nothing listens on right now.
    pub fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }
}

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// Write a raw request and read until the server goes quiet.
    pub fn send_request(addr: &SocketAddr, req: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(req.as_bytes()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut buf = Vec::new();
        loop {
            let mut tmp = [0u8; 1024];
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&tmp[..n]),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break
                }
                Err(e) => panic!("read error: {e:?}"),
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn get(addr: &SocketAddr, path: &str) -> (u16, Vec<(String, String)>, String) {
        parse_response(&send_request(
            addr,
            &format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n"),
        ))
    }

    /// Status, lowercase headers and body.
    pub fn parse_response(resp: &str) -> (u16, Vec<(String, String)>, String) {
        let (head, body) = resp.split_once("\r\n\r\n").unwrap_or((resp, ""));
        let mut status = 0;
        let mut headers = Vec::new();
        for line in head.lines() {
            if line.starts_with("HTTP/1.1") {
                status = line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("0")
                    .parse()
                    .unwrap_or(0);
            } else if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }
        (status, headers, body.to_string())
    }

    pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

pub mod wait {
    use std::time::{Duration, Instant};

    /// Poll `check` until it holds or `timeout` passes.
    pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if check() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

pub mod runtime {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use whiteboard::ids::ContainerHandle;
    use whiteboard::runtime::{ResolvedApplication, Runtime, RuntimeError, RuntimeSettings};
    use whiteboard::{Properties, WhiteboardRuntime};

    /// A real runtime that counts what the dispatcher asks of it.
    pub struct CountingRuntime {
        pub inner: WhiteboardRuntime,
        registered: AtomicUsize,
        reloaded: AtomicUsize,
        unregistered: AtomicUsize,
    }

    impl CountingRuntime {
        pub fn new(name: &str) -> Self {
            Self {
                inner: WhiteboardRuntime::new(RuntimeSettings::new(name, 8080)),
                registered: AtomicUsize::new(0),
                reloaded: AtomicUsize::new(0),
                unregistered: AtomicUsize::new(0),
            }
        }

        /// (register, reload, unregister)
        pub fn counts(&self) -> (usize, usize, usize) {
            (
                self.registered.load(Ordering::SeqCst),
                self.reloaded.load(Ordering::SeqCst),
                self.unregistered.load(Ordering::SeqCst),
            )
        }
    }

    impl Runtime for CountingRuntime {
        fn register(&self, application: ResolvedApplication) -> Result<ContainerHandle, RuntimeError> {
            let handle = self.inner.register(application)?;
            self.registered.fetch_add(1, Ordering::SeqCst);
            Ok(handle)
        }

        fn reload(
            &self,
            handle: ContainerHandle,
            application: ResolvedApplication,
        ) -> Result<(), RuntimeError> {
            self.inner.reload(handle, application)?;
            self.reloaded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unregister(&self, handle: ContainerHandle) -> Result<(), RuntimeError> {
            self.inner.unregister(handle)?;
            self.unregistered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn urls(&self) -> Vec<String> {
            self.inner.urls()
        }

        fn properties(&self) -> Properties {
            self.inner.properties()
        }
    }
}

pub mod providers {
    use http::Method;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use whiteboard::handler::{HandlerRequest, HandlerResponse};
    use whiteboard::provider::ServiceReference;
    use whiteboard::service::{
        Application, MethodInfo, Resource, ResourceDescriptor, ServiceFactory, ServiceObject,
    };
    use whiteboard::{keys, Properties};

    /// `GET {path}` answering `{"from": tag}`.
    pub struct Tagged {
        pub path: String,
        pub tag: String,
    }

    impl Resource for Tagged {
        fn descriptor(&self) -> ResourceDescriptor {
            ResourceDescriptor::at(&self.path).method(MethodInfo::new(Method::GET, "", "get"))
        }

        fn handle(&self, _operation: &str, _req: &HandlerRequest) -> HandlerResponse {
            HandlerResponse::json(200, json!({ "from": self.tag }))
        }
    }

    pub fn resource(id: i64, name: &str, path: &str) -> ServiceReference {
        ServiceReference::new(
            id,
            Properties::new()
                .with(keys::NAME, name)
                .with(keys::RESOURCE, true),
            ServiceObject::resource(Tagged {
                path: path.to_string(),
                tag: name.to_string(),
            }),
        )
    }

    /// A resource bound to the application called `app`.
    pub fn resource_in(id: i64, name: &str, path: &str, app: &str) -> ServiceReference {
        let mut reference = resource(id, name, path);
        reference.properties.insert(
            keys::APPLICATION_SELECT,
            format!("({}={app})", keys::NAME).as_str(),
        );
        reference
    }

    pub fn application(id: i64, name: &str, base: &str) -> ServiceReference {
        ServiceReference::new(
            id,
            Properties::new()
                .with(keys::NAME, name)
                .with(keys::APPLICATION_BASE, base),
            ServiceObject::None,
        )
    }

    /// An application object that brings its own singleton resources.
    pub struct LegacyApp {
        pub singletons: Vec<Arc<dyn Resource>>,
    }

    impl Application for LegacyApp {
        fn singletons(&self) -> Vec<Arc<dyn Resource>> {
            self.singletons.clone()
        }
    }

    /// Hands out one shared application object for the first `supply`
    /// calls, then nothing.
    pub struct CountingAppFactory {
        instance: Arc<dyn Application>,
        supply: usize,
        gets: AtomicUsize,
    }

    impl CountingAppFactory {
        pub fn new(instance: Arc<dyn Application>, supply: usize) -> Self {
            Self {
                instance,
                supply,
                gets: AtomicUsize::new(0),
            }
        }

        pub fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }
    }

    impl ServiceFactory<dyn Application> for CountingAppFactory {
        fn get(&self) -> Option<Arc<dyn Application>> {
            let n = self.gets.fetch_add(1, Ordering::SeqCst);
            (n < self.supply).then(|| Arc::clone(&self.instance))
        }
    }

    /// A legacy application at `base` serving one `Tagged` singleton at `path`.
    pub fn legacy_application(
        id: i64,
        name: &str,
        base: &str,
        path: &str,
        supply: usize,
    ) -> (ServiceReference, Arc<CountingAppFactory>) {
        let singleton: Arc<dyn Resource> = Arc::new(Tagged {
            path: path.to_string(),
            tag: format!("{name}-singleton"),
        });
        let app: Arc<dyn Application> = Arc::new(LegacyApp {
            singletons: vec![singleton],
        });
        let factory = Arc::new(CountingAppFactory::new(app, supply));
        let reference = ServiceReference::new(
            id,
            Properties::new()
                .with(keys::NAME, name)
                .with(keys::APPLICATION_BASE, base),
            ServiceObject::Application(Arc::clone(&factory) as Arc<dyn ServiceFactory<dyn Application>>),
        );
        (reference, factory)
    }
}
