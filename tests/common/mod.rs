//! Shared fakes for the integration tests
//!
//! A counting driver whose open behavior can be switched at runtime, a counting tunnel
//! and scripted password functions.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cdbc::{
    ConnectOptions, ConnectionParameters, DatabaseDriver, DbcError, DriverConnection, DriverError,
    DriverManager, Settings, TunnelConnection, TunnelMessage, TunnelOptions,
};

/// How the fake driver answers `connect`
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Any password works
    AcceptAny,
    /// Only this password works, anything else is access denied
    AcceptPassword(String),
    /// The password must be `pw-<user>`
    PasswordPerUser,
    AlwaysDeny,
    Expired,
    Fail(String),
}

#[derive(Default)]
pub struct DriverStats {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub thread_cleanups: AtomicUsize,
    pub passwords: Mutex<Vec<Option<String>>>,
    pub endpoints: Mutex<Vec<(Option<String>, Option<u16>)>>,
    /// Opens that saw another account's password
    pub mismatches: AtomicUsize,
    pub executed: Mutex<Vec<String>>,
}

impl DriverStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn passwords(&self) -> Vec<Option<String>> {
        self.passwords.lock().unwrap().clone()
    }
}

pub struct FakeDriver {
    name: String,
    requires_password: bool,
    behavior: Mutex<Behavior>,
    pub stats: Arc<DriverStats>,
}

impl FakeDriver {
    pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            requires_password: true,
            behavior: Mutex::new(behavior),
            stats: Arc::new(DriverStats::default()),
        })
    }

    pub fn passwordless(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            requires_password: false,
            behavior: Mutex::new(Behavior::AcceptAny),
            stats: Arc::new(DriverStats::default()),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }
}

impl DatabaseDriver for FakeDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn client_version(&self) -> String {
        "fake 1.0".to_string()
    }

    fn requires_password(&self, _params: &ConnectionParameters) -> bool {
        self.requires_password
    }

    fn connect(
        &self,
        options: &ConnectOptions<'_>,
    ) -> Result<Box<dyn DriverConnection>, DriverError> {
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        let password = options.password.map(str::to_string);
        self.stats.passwords.lock().unwrap().push(password.clone());
        self.stats
            .endpoints
            .lock()
            .unwrap()
            .push((options.host.map(str::to_string), options.port));

        let behavior = self.behavior.lock().unwrap().clone();
        let accepted = match behavior {
            Behavior::AcceptAny => true,
            Behavior::AcceptPassword(expected) => password.as_deref() == Some(expected.as_str()),
            Behavior::PasswordPerUser => {
                let expected = format!("pw-{}", options.params.user.as_deref().unwrap_or(""));
                let ok = password.as_deref() == Some(expected.as_str());
                if !ok && password.is_some() {
                    self.stats.mismatches.fetch_add(1, Ordering::SeqCst);
                }
                ok
            }
            Behavior::AlwaysDeny => false,
            Behavior::Expired => return Err(DriverError::PasswordExpired("password expired".into())),
            Behavior::Fail(message) => return Err(DriverError::failed(message)),
        };

        if accepted {
            Ok(Box::new(FakeConnection { stats: Arc::clone(&self.stats), closed: false }))
        } else {
            Err(DriverError::AccessDenied("Access denied for user".into()))
        }
    }

    fn thread_cleanup(&self) {
        self.stats.thread_cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeConnection {
    stats: Arc<DriverStats>,
    closed: bool,
}

impl DriverConnection for FakeConnection {
    fn execute(&mut self, sql: &str) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::failed("closed"));
        }
        self.stats.executed.lock().unwrap().push(sql.to_string());
        Ok(())
    }

    fn server_version(&self) -> Option<String> {
        Some("8.0.36-fake".to_string())
    }

    fn connection_id(&mut self) -> Option<i64> {
        Some(7)
    }

    fn set_schema(&mut self, _schema: &str) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_autocommit(&mut self, _enabled: bool) -> Result<(), DriverError> {
        Ok(())
    }

    fn close(&mut self) {
        assert!(!self.closed, "connection closed twice");
        self.closed = true;
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Register `driver` on `manager` under its own name
pub fn register(manager: &DriverManager, driver: &Arc<FakeDriver>) {
    let shared = Arc::clone(driver);
    manager.register_driver(driver.name().to_string(), move || {
        Ok(Arc::clone(&shared) as Arc<dyn DatabaseDriver>)
    });
}

/// Manager with a single fake driver named "fake"
pub fn manager_with(behavior: Behavior) -> (DriverManager, Arc<FakeDriver>) {
    manager_with_settings(behavior, Settings::default())
}

pub fn manager_with_settings(behavior: Behavior, settings: Settings) -> (DriverManager, Arc<FakeDriver>) {
    let manager = DriverManager::new(settings);
    let driver = FakeDriver::new("fake", behavior);
    register(&manager, &driver);
    (manager, driver)
}

pub fn params(user: &str) -> ConnectionParameters {
    ConnectionParameters::new("fake").host("db.internal").port(3306).user(user)
}

pub fn tunneled_params(user: &str) -> ConnectionParameters {
    params(user).tunnel(TunnelOptions {
        host: "bastion.internal".to_string(),
        port: Some(22),
        user: Some("ops".to_string()),
        key_file: None,
    })
}

#[derive(Default)]
pub struct TunnelStats {
    pub created: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl TunnelStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

pub struct FakeTunnel {
    stats: Arc<TunnelStats>,
    port: u16,
    /// Error text `connect` fails with
    refuse: Option<String>,
    messages: Mutex<VecDeque<TunnelMessage>>,
}

impl TunnelConnection for FakeTunnel {
    fn connect(&self, _params: &ConnectionParameters) -> cdbc::Result<()> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.refuse {
            return Err(DbcError::connection_failed(message.clone()));
        }
        self.messages.lock().unwrap().push_back(TunnelMessage::new("info", "tunnel up"));
        Ok(())
    }

    fn disconnect(&self) {
        self.stats.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn next_message(&self) -> Option<TunnelMessage> {
        self.messages.lock().unwrap().pop_front()
    }
}

/// Install a tunnel factory that hands out counting tunnels on `port`
pub fn install_tunnels(manager: &DriverManager, port: u16) -> Arc<TunnelStats> {
    install_counting_tunnels(manager, port, None)
}

/// Install a tunnel factory whose tunnels are created fine but fail to connect
pub fn install_unreachable_tunnels(manager: &DriverManager, message: &str) -> Arc<TunnelStats> {
    install_counting_tunnels(manager, 40999, Some(message.to_string()))
}

fn install_counting_tunnels(manager: &DriverManager, port: u16, refuse: Option<String>) -> Arc<TunnelStats> {
    let stats = Arc::new(TunnelStats::default());
    let shared = Arc::clone(&stats);
    manager.set_tunnel_factory(move |_params| {
        shared.created.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Box::new(FakeTunnel {
            stats: Arc::clone(&shared),
            port,
            refuse: refuse.clone(),
            messages: Mutex::new(VecDeque::new()),
        }) as Box<dyn TunnelConnection>))
    });
    stats
}

/// Install a tunnel factory that always fails
pub fn install_failing_tunnels(manager: &DriverManager) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    manager.set_tunnel_factory(move |_params| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(DbcError::connection_failed("ssh: connection refused"))
    });
    calls
}

/// Scripted password functions recording every call
#[derive(Default)]
pub struct PasswordScript {
    pub find_calls: AtomicUsize,
    /// `force_prompt` of every request call
    pub request_calls: Mutex<Vec<bool>>,
    pub find_answer: Mutex<Option<String>>,
    pub request_answers: Mutex<VecDeque<Option<String>>>,
}

impl PasswordScript {
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn request_calls(&self) -> Vec<bool> {
        self.request_calls.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.find_calls() + self.request_calls().len()
    }
}

/// Install both password functions
///
/// `find` answers every lookup; `requests` are answered in order, then `None` (cancel).
pub fn install_passwords(
    manager: &DriverManager,
    find: Option<&str>,
    requests: &[Option<&str>],
) -> Arc<PasswordScript> {
    let script = Arc::new(PasswordScript {
        find_answer: Mutex::new(find.map(str::to_string)),
        request_answers: Mutex::new(requests.iter().map(|r| r.map(str::to_string)).collect()),
        ..Default::default()
    });

    let for_find = Arc::clone(&script);
    manager.set_password_find(move |_params| {
        for_find.find_calls.fetch_add(1, Ordering::SeqCst);
        for_find.find_answer.lock().unwrap().clone()
    });

    let for_request = Arc::clone(&script);
    manager.set_password_request(move |_params, force_prompt| {
        for_request.request_calls.lock().unwrap().push(force_prompt);
        for_request.request_answers.lock().unwrap().pop_front().flatten()
    });

    script
}
