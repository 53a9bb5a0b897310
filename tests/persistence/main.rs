//! Persistence Integration Tests
//!
//! Sessions and db contexts wired through the AutoTx facility, backed by the
//! in-memory store.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test persistence
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use autotx::container::{invoke, Component, Container, Interceptor};
use autotx::core::{Error, MethodDescriptor, Reflect, Result, TransactionAttribute};
use autotx::facility::{AmbientTransactionOption, AutoTxContainerExt, AutoTxOptions};
use autotx::persistence::memory::{MemoryDatabase, MemoryDbContextFactory, MemorySessionFactory};
use autotx::persistence::{
    ConfigurationPersister, DbContext, DbContextFacility, DbContextFactory, DbContextInstaller,
    DbContextManager, DbContextOptions, DefaultLifeStyleOption, FileConfigurationPersister,
    FlushMode, PersistenceContainerExt, Session, SessionConfiguration, SessionFacility,
    SessionFactory, SessionInstaller, SessionManager, TransactionCommitAction,
};
use parking_lot::Mutex;
use serde_json::json;

// =============================================================================
// SHARED TEST UTILITIES
// =============================================================================

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

type Work = Box<dyn FnOnce() -> Result<()> + Send>;

fn work<F>(f: F) -> Work
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    Box::new(f)
}

/// Service whose one method runs in a transaction.
trait Service: Send + Sync {
    fn run(&self, work: Work) -> Result<()>;
}

struct ServiceImpl;

impl Reflect for ServiceImpl {
    fn methods() -> Vec<MethodDescriptor> {
        vec![MethodDescriptor::overridable("run").transactional(TransactionAttribute::requires())]
    }
}

impl Service for ServiceImpl {
    fn run(&self, work: Work) -> Result<()> {
        work()
    }
}

struct ServiceProxy {
    target: Arc<dyn Service>,
    interceptor: Arc<dyn Interceptor>,
}

impl Service for ServiceProxy {
    fn run(&self, work: Work) -> Result<()> {
        let target = Arc::clone(&self.target);
        invoke(&*self.interceptor, "run", move || target.run(work))
    }
}

fn register_service(container: &Container) {
    container
        .register(
            Component::<dyn Service>::new(|_| Ok(Arc::new(ServiceImpl) as Arc<dyn Service>))
                .implemented_by::<ServiceImpl>()
                .proxied_by::<ServiceProxy, _>(|target, interceptor| {
                    Arc::new(ServiceProxy { target, interceptor }) as Arc<dyn Service>
                }),
        )
        .unwrap();
}

fn service(container: &Container) -> Arc<dyn Service> {
    container.resolve::<dyn Service>().unwrap()
}

/// Installer over a [`MemoryDatabase`], optionally caching its configuration
/// in a file.
struct MemoryInstaller {
    key: String,
    is_default: bool,
    db: Arc<MemoryDatabase>,
    configured: AtomicUsize,
    registered: Arc<Mutex<Vec<String>>>,
    cache: Option<PathBuf>,
}

impl MemoryInstaller {
    fn new(key: &str, is_default: bool, db: &Arc<MemoryDatabase>) -> Self {
        Self {
            key: key.to_owned(),
            is_default,
            db: Arc::clone(db),
            configured: AtomicUsize::new(0),
            registered: Arc::new(Mutex::new(Vec::new())),
            cache: None,
        }
    }

    fn notifying(mut self, log: &Arc<Mutex<Vec<String>>>) -> Self {
        self.registered = Arc::clone(log);
        self
    }

    fn cached_at(mut self, path: PathBuf) -> Self {
        self.cache = Some(path);
        self
    }
}

impl SessionInstaller for MemoryInstaller {
    fn is_default(&self) -> bool {
        self.is_default
    }

    fn session_factory_key(&self) -> &str {
        &self.key
    }

    fn config(&self) -> SessionConfiguration {
        self.configured.fetch_add(1, Ordering::SeqCst);
        SessionConfiguration::new(format!("memory://{}", self.key)).mapping("Order")
    }

    fn build_session_factory(&self, configuration: &SessionConfiguration) -> Result<Arc<dyn SessionFactory>> {
        if !configuration.connection_string.starts_with("memory://") {
            return Err(Error::Configuration(format!(
                "unsupported connection string {}",
                configuration.connection_string
            )));
        }
        Ok(Arc::new(MemorySessionFactory::new(Arc::clone(&self.db))))
    }

    fn registered(&self, _factory: &Arc<dyn SessionFactory>) {
        self.registered.lock().push(self.key.clone());
    }

    fn deserialize(&self) -> Option<SessionConfiguration> {
        let path = self.cache.as_ref()?;
        let persister = FileConfigurationPersister::new();
        if persister.is_new_configuration_required(path, &[]) {
            return None;
        }
        persister.read_configuration(path).ok().flatten()
    }

    fn serialize(&self, configuration: &SessionConfiguration) -> Result<()> {
        match &self.cache {
            Some(path) => FileConfigurationPersister::new().write_configuration(path, configuration),
            None => Ok(()),
        }
    }

    fn after_deserialize(&self, configuration: &mut SessionConfiguration) -> Result<()> {
        configuration
            .properties
            .insert("loaded_by".into(), self.key.clone());
        Ok(())
    }
}

impl DbContextInstaller for MemoryInstaller {
    fn is_default(&self) -> bool {
        self.is_default
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn config(&self) -> DbContextOptions {
        DbContextOptions::new(format!("memory://{}", self.key))
    }

    fn build_factory(&self, _options: &DbContextOptions) -> Result<Arc<dyn DbContextFactory>> {
        Ok(Arc::new(MemoryDbContextFactory::new(Arc::clone(&self.db))))
    }

    fn registered(&self, _factory: &Arc<dyn DbContextFactory>) {
        self.registered.lock().push(self.key.clone());
    }
}

fn add_session_installer(container: &Container, installer: MemoryInstaller) {
    let installer: Arc<dyn SessionInstaller> = Arc::new(installer);
    container
        .register(Component::instance(installer).named(format!("installer-{}", container.registrations().len())))
        .unwrap();
}

fn add_context_installer(container: &Container, installer: MemoryInstaller) {
    let installer: Arc<dyn DbContextInstaller> = Arc::new(installer);
    container
        .register(Component::instance(installer).named(format!("installer-{}", container.registrations().len())))
        .unwrap();
}

/// AutoTx, one default memory session installer, and the service.
fn session_container(facility: SessionFacility) -> (Container, Arc<MemoryDatabase>) {
    init_tracing();
    let db = Arc::new(MemoryDatabase::new());
    let container = Container::new();
    container.add_auto_tx().unwrap();
    add_session_installer(&container, MemoryInstaller::new("main", true, &db));
    container.add_sessions(facility).unwrap();
    register_service(&container);
    (container, db)
}

fn context_container(facility: DbContextFacility) -> (Container, Arc<MemoryDatabase>) {
    init_tracing();
    let db = Arc::new(MemoryDatabase::new());
    let container = Container::new();
    container.add_auto_tx().unwrap();
    add_context_installer(&container, MemoryInstaller::new("main", true, &db));
    container.add_db_contexts(facility).unwrap();
    register_service(&container);
    (container, db)
}

// =============================================================================
// INSTALLER VALIDATION
// =============================================================================

fn session_init_error(installers: Vec<MemoryInstaller>) -> Error {
    init_tracing();
    let container = Container::new();
    container.add_auto_tx().unwrap();
    for installer in installers {
        add_session_installer(&container, installer);
    }
    container.add_sessions(SessionFacility::new()).unwrap_err()
}

#[test]
fn test_no_installers_rejected() {
    let err = session_init_error(Vec::new());
    assert!(err.is_configuration());
    assert!(err.to_string().contains("no SessionInstaller-s registered."), "{}", err);
}

#[test]
fn test_default_installer_must_be_unique() {
    let db = Arc::new(MemoryDatabase::new());
    let none = session_init_error(vec![MemoryInstaller::new("a", false, &db)]);
    assert!(none.to_string().contains("IsDefault"), "{}", none);

    let many = session_init_error(vec![
        MemoryInstaller::new("a", true, &db),
        MemoryInstaller::new("b", true, &db),
    ]);
    assert!(many.to_string().contains("IsDefault"), "{}", many);
}

#[test]
fn test_keys_must_be_present_and_unique() {
    let db = Arc::new(MemoryDatabase::new());
    let empty = session_init_error(vec![MemoryInstaller::new("", true, &db)]);
    assert!(empty.to_string().contains("non empty"), "{}", empty);

    let duplicate = session_init_error(vec![
        MemoryInstaller::new("main", true, &db),
        MemoryInstaller::new("main", false, &db),
    ]);
    assert!(duplicate.to_string().contains("Duplicate session factory keys 'main'"), "{}", duplicate);
}

#[test]
fn test_auto_tx_facility_required() {
    init_tracing();
    let db = Arc::new(MemoryDatabase::new());
    let container = Container::new();
    add_session_installer(&container, MemoryInstaller::new("main", true, &db));

    let err = container.add_sessions(SessionFacility::new()).unwrap_err();
    assert!(err.is_configuration());
    assert!(
        err.to_string()
            .contains("The SessionFacility is dependent on the 'AutoTxFacility' facility"),
        "{}",
        err
    );

    let container = Container::new();
    add_context_installer(&container, MemoryInstaller::new("main", true, &db));
    let err = container.add_db_contexts(DbContextFacility::new()).unwrap_err();
    assert!(err.to_string().contains("DbContextFacility"), "{}", err);
}

#[test]
fn test_failing_factory_build_propagates() {
    struct Broken;

    impl SessionInstaller for Broken {
        fn is_default(&self) -> bool {
            true
        }

        fn session_factory_key(&self) -> &str {
            "broken"
        }

        fn config(&self) -> SessionConfiguration {
            SessionConfiguration::new("tcp://nowhere")
        }

        fn build_session_factory(&self, configuration: &SessionConfiguration) -> Result<Arc<dyn SessionFactory>> {
            Err(Error::Configuration(format!(
                "unsupported connection string {}",
                configuration.connection_string
            )))
        }
    }

    init_tracing();
    let container = Container::new();
    container.add_auto_tx().unwrap();
    container
        .use_instance(Arc::new(Broken) as Arc<dyn SessionInstaller>)
        .unwrap();

    let err = container.add_sessions(SessionFacility::new()).unwrap_err();
    assert!(err.to_string().contains("tcp://nowhere"), "{}", err);
    assert!(!container.is_registered::<SessionFacility>());
}

// =============================================================================
// SESSIONS
// =============================================================================

#[test]
fn test_session_shared_within_transaction() {
    let (container, _db) = session_container(SessionFacility::new());
    let seen: Arc<Mutex<Vec<uuid::Uuid>>> = Arc::new(Mutex::new(Vec::new()));

    let c = container.clone();
    let s = service(&container);
    let slot = Arc::clone(&seen);
    service(&container)
        .run(work(move || {
            slot.lock().push(c.resolve::<dyn Session>()?.id());
            let inner_container = c.clone();
            let inner_slot = Arc::clone(&slot);
            s.run(work(move || {
                inner_slot.lock().push(inner_container.resolve::<dyn Session>()?.id());
                Ok(())
            }))
        }))
        .unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
}

#[test]
fn test_session_outside_transaction_is_missing_transaction() {
    let (container, _db) = session_container(SessionFacility::new());
    let err = container.resolve::<dyn Session>().err().expect("expected resolve error");
    assert!(err.is_missing_transaction(), "{}", err);

    // The transient registration works anywhere.
    let a = container.resolve_named::<dyn Session>("main-session-transient").unwrap();
    let b = container.resolve_named::<dyn Session>("main-session-transient").unwrap();
    assert_ne!(a.id(), b.id());
}

#[test]
fn test_transient_default_life_style() {
    let (container, _db) =
        session_container(SessionFacility::new().default_life_style(DefaultLifeStyleOption::Transient));
    let a = container.resolve::<dyn Session>().unwrap();
    let b = container.resolve::<dyn Session>().unwrap();
    assert_ne!(a.id(), b.id());
}

#[test]
fn test_flushed_session_write_commits_with_transaction() {
    let (container, db) = session_container(SessionFacility::new());
    let captured: Arc<Mutex<Option<Arc<dyn Session>>>> = Arc::new(Mutex::new(None));

    let c = container.clone();
    let slot = Arc::clone(&captured);
    service(&container)
        .run(work(move || {
            let session = c.resolve::<dyn Session>()?;
            session.save("order/1", json!({ "qty": 3 }))?;
            session.flush()?;
            *slot.lock() = Some(session);
            Ok(())
        }))
        .unwrap();

    assert_eq!(db.get("order/1"), Some(json!({ "qty": 3 })));
    // Closed when its transaction scope ended.
    assert!(!captured.lock().take().unwrap().is_open());
}

#[test]
fn test_run_and_fail_leaves_no_row() {
    let (container, db) = session_container(SessionFacility::new());

    let c = container.clone();
    let err = service(&container)
        .run(work(move || {
            let session = c.resolve::<dyn Session>()?;
            session.save("order/1", json!({ "qty": 3 }))?;
            session.flush()?;
            Err(Error::failed("payment declined"))
        }))
        .unwrap_err();

    assert!(err.to_string().contains("payment declined"), "{}", err);
    assert!(db.is_empty());
}

#[test]
fn test_flush_mode_always_writes_on_save() {
    let (container, db) = session_container(SessionFacility::new().flush_mode(FlushMode::Always));

    let c = container.clone();
    service(&container)
        .run(work(move || {
            let session = c.resolve::<dyn Session>()?;
            assert_eq!(session.flush_mode(), FlushMode::Always);
            session.save("order/1", json!(1))?;
            Ok(())
        }))
        .unwrap();
    assert_eq!(db.get("order/1"), Some(json!(1)));
}

#[test]
fn test_explicit_unit_of_work_commits_unflushed_changes() {
    let (container, db) = session_container(SessionFacility::new());
    let manager = container.resolve::<SessionManager>().unwrap();

    let m = Arc::clone(&manager);
    service(&container)
        .run(work(move || {
            let first = m.open_session()?;
            let second = m.open_session()?;
            assert_eq!(first.id(), second.id());
            first.save("order/1", json!("placed"))?;
            assert_eq!(m.pending(), 1);
            Ok(())
        }))
        .unwrap();

    assert_eq!(db.get("order/1"), Some(json!("placed")));
    assert_eq!(manager.pending(), 0);
}

#[test]
fn test_explicit_unit_of_work_rolls_back_on_failure() {
    let (container, db) = session_container(SessionFacility::new());
    let manager = container.resolve::<SessionManager>().unwrap();

    let m = Arc::clone(&manager);
    let result = service(&container).run(work(move || {
        m.open_session()?.save("order/1", json!("placed"))?;
        Err(Error::failed("out of stock"))
    }));

    assert!(result.is_err());
    assert!(db.is_empty());
    assert_eq!(manager.pending(), 0);
}

#[test]
fn test_implicit_unit_of_work_follows_ambient_transaction() {
    init_tracing();
    let db = Arc::new(MemoryDatabase::new());
    let container = Container::new();
    container
        .add_auto_tx_with(AutoTxOptions::default().ambient_transaction(AmbientTransactionOption::Enabled))
        .unwrap();
    add_session_installer(&container, MemoryInstaller::new("main", true, &db));
    container.add_sessions(SessionFacility::new()).unwrap();
    register_service(&container);
    let manager = container.resolve::<SessionManager>().unwrap();

    let m = Arc::clone(&manager);
    service(&container)
        .run(work(move || {
            let session = m.open_session()?;
            session.save("flushed", json!(1))?;
            session.flush()?;
            // Never flushed, so dropped with the session.
            session.save("unflushed", json!(2))?;
            Ok(())
        }))
        .unwrap();

    assert_eq!(db.get("flushed"), Some(json!(1)));
    assert_eq!(db.get("unflushed"), None);
}

#[test]
fn test_facility_option_overrides_container_option() {
    let (container, db) =
        session_container(SessionFacility::new().ambient_transaction(AmbientTransactionOption::Enabled));
    let manager = container.resolve::<SessionManager>().unwrap();

    let m = Arc::clone(&manager);
    service(&container)
        .run(work(move || {
            m.open_session()?.save("unflushed", json!(2))?;
            Ok(())
        }))
        .unwrap();
    assert!(db.is_empty());
}

#[test]
fn test_session_manager_outside_transaction_opens_fresh_sessions() {
    let (container, _db) = session_container(SessionFacility::new());
    let manager = container.resolve::<SessionManager>().unwrap();
    let a = manager.open_session().unwrap();
    let b = manager.open_session().unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(manager.pending(), 0);
}

#[test]
fn test_named_and_default_registrations() {
    init_tracing();
    let main_db = Arc::new(MemoryDatabase::new());
    let audit_db = Arc::new(MemoryDatabase::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    container.add_auto_tx().unwrap();
    add_session_installer(&container, MemoryInstaller::new("audit", false, &audit_db).notifying(&log));
    add_session_installer(&container, MemoryInstaller::new("main", true, &main_db).notifying(&log));
    container.add_sessions(SessionFacility::new()).unwrap();
    register_service(&container);

    // Default installer is configured first.
    assert_eq!(*log.lock(), vec!["main".to_string(), "audit".to_string()]);

    let main_cfg = container.resolve_named::<SessionConfiguration>("main-cfg").unwrap();
    let default_cfg = container.resolve::<SessionConfiguration>().unwrap();
    assert_eq!(main_cfg, default_cfg);
    assert_eq!(main_cfg.properties.get("loaded_by").map(String::as_str), Some("main"));
    let audit_cfg = container.resolve_named::<SessionConfiguration>("audit-cfg").unwrap();
    assert_eq!(audit_cfg.connection_string, "memory://audit");

    assert!(container.is_registered_named::<dyn SessionFactory>("audit"));
    assert!(container.is_registered_named::<SessionManager>("audit-manager"));

    let c = container.clone();
    service(&container)
        .run(work(move || {
            let main = c.resolve::<dyn Session>()?;
            let audit = c.resolve_named::<dyn Session>("audit-session")?;
            assert_ne!(main.id(), audit.id());
            assert_eq!(c.resolve_named::<dyn Session>("main-session")?.id(), main.id());
            audit.save("entry", json!("audited"))?;
            audit.flush()?;
            Ok(())
        }))
        .unwrap();

    assert_eq!(audit_db.get("entry"), Some(json!("audited")));
    assert!(main_db.is_empty());
}

#[test]
fn test_configuration_cached_between_containers() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.cfg.json");
    let db = Arc::new(MemoryDatabase::new());

    let first = Arc::new(MemoryInstaller::new("main", true, &db).cached_at(path.clone()));
    let container = Container::new();
    container.add_auto_tx().unwrap();
    container
        .use_instance(Arc::clone(&first) as Arc<dyn SessionInstaller>)
        .unwrap();
    container.add_sessions(SessionFacility::new()).unwrap();
    assert_eq!(first.configured.load(Ordering::SeqCst), 1);
    assert!(path.exists());

    let second = Arc::new(MemoryInstaller::new("main", true, &db).cached_at(path.clone()));
    let container = Container::new();
    container.add_auto_tx().unwrap();
    container
        .use_instance(Arc::clone(&second) as Arc<dyn SessionInstaller>)
        .unwrap();
    container.add_sessions(SessionFacility::new()).unwrap();
    assert_eq!(second.configured.load(Ordering::SeqCst), 0);

    let cfg = container.resolve::<SessionConfiguration>().unwrap();
    assert_eq!(cfg.mappings, vec!["Order".to_string()]);
    // Applied after loading, never persisted.
    assert_eq!(cfg.properties.get("loaded_by").map(String::as_str), Some("main"));
    let stored = FileConfigurationPersister::new()
        .read_configuration(&path)
        .unwrap()
        .unwrap();
    assert!(stored.properties.is_empty());
}

// =============================================================================
// DB CONTEXTS
// =============================================================================

#[test]
fn test_context_per_transaction() {
    let (container, db) = context_container(DbContextFacility::new());
    let captured: Arc<Mutex<Vec<Arc<dyn DbContext>>>> = Arc::new(Mutex::new(Vec::new()));

    let c = container.clone();
    let slot = Arc::clone(&captured);
    service(&container)
        .run(work(move || {
            let a = c.resolve::<dyn DbContext>()?;
            let b = c.resolve_named::<dyn DbContext>("main-context")?;
            assert_eq!(a.id(), b.id());
            a.add("customer/7", json!({ "name": "Ada" }))?;
            assert_eq!(a.save_changes()?, 1);
            slot.lock().push(a);
            Ok(())
        }))
        .unwrap();

    assert_eq!(db.get("customer/7"), Some(json!({ "name": "Ada" })));
    assert!(captured.lock()[0].is_disposed());

    let err = container.resolve::<dyn DbContext>().err().expect("expected resolve error");
    assert!(err.is_missing_transaction(), "{}", err);
}

#[test]
fn test_context_changes_discarded_on_failure() {
    let (container, db) = context_container(DbContextFacility::new());

    let c = container.clone();
    let result = service(&container).run(work(move || {
        let context = c.resolve::<dyn DbContext>()?;
        context.add("customer/7", json!({ "name": "Ada" }))?;
        context.save_changes()?;
        Err(Error::failed("validation failed"))
    }));

    assert!(result.is_err());
    assert!(db.is_empty());
}

#[test]
fn test_context_manager_commit_action() {
    let (container, db) =
        context_container(DbContextFacility::new().commit_action(TransactionCommitAction::Nothing));
    let manager = container.resolve::<DbContextManager>().unwrap();
    assert_eq!(manager.commit_action(), TransactionCommitAction::Nothing);
    let captured: Arc<Mutex<Option<Arc<dyn DbContext>>>> = Arc::new(Mutex::new(None));

    let m = Arc::clone(&manager);
    let slot = Arc::clone(&captured);
    service(&container)
        .run(work(move || {
            let context = m.open_db_context()?;
            assert_eq!(context.id(), m.open_db_context()?.id());
            context.add("k", json!(true))?;
            context.save_changes()?;
            *slot.lock() = Some(context);
            Ok(())
        }))
        .unwrap();

    assert_eq!(db.get("k"), Some(json!(true)));
    assert_eq!(manager.pending(), 0);
    assert!(!captured.lock().take().unwrap().is_disposed());

    // Outside a transaction every call creates a new context.
    let a = manager.open_db_context().unwrap();
    let b = manager.open_db_context().unwrap();
    assert_ne!(a.id(), b.id());
}

#[test]
fn test_context_manager_disposes_by_default() {
    let (container, _db) = context_container(DbContextFacility::new());
    let manager = container.resolve::<DbContextManager>().unwrap();
    let captured: Arc<Mutex<Option<Arc<dyn DbContext>>>> = Arc::new(Mutex::new(None));

    let m = Arc::clone(&manager);
    let slot = Arc::clone(&captured);
    service(&container)
        .run(work(move || {
            *slot.lock() = Some(m.open_db_context()?);
            Ok(())
        }))
        .unwrap();
    assert!(captured.lock().take().unwrap().is_disposed());
}
