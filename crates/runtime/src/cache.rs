//! Shared process cache.
//!
//! One instance owns every piece of cross-worker state: the route
//! table, controller dispatch metadata, compiled programs, the daemon
//! and crontab registries, and the external database bridge. Handlers
//! and the scheduler receive it explicitly; nothing here is global, so
//! tests can stand up isolated instances side by side.
//!
//! The route table is kept behind a snapshot pointer: readers clone an
//! `Arc` and match against an immutable table, writers swap in a new
//! one. Admin edits therefore never tear a lookup in progress.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio_util::sync::CancellationToken;

use plinth_core::error::CoreError;
use plinth_db::repositories::SourceRepo;
use plinth_db::DbPool;

use crate::bridge::DbBridge;
use crate::engine::InterruptFlag;
use crate::program::Program;
use crate::router::{compile_route, RouteTable};

/// Dispatch metadata for one controller, loaded lazily on first hit.
#[derive(Debug, Clone)]
pub struct ControllerMeta {
    pub name: String,
    /// Required request method; empty accepts any.
    pub method: String,
}

#[derive(Default)]
pub struct ProcessCache {
    routes: RwLock<Arc<RouteTable>>,
    controllers: RwLock<HashMap<String, ControllerMeta>>,
    modules: Mutex<HashMap<String, Arc<Program>>>,
    daemons: Mutex<HashMap<String, Arc<InterruptFlag>>>,
    crontabs: Mutex<HashMap<String, CancellationToken>>,
    pub bridge: DbBridge,
}

impl ProcessCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- routes ----

    pub fn route_snapshot(&self) -> Arc<RouteTable> {
        self.routes.read().expect("route table lock").clone()
    }

    /// Compile and install (or replace) one controller's route.
    pub fn set_route(&self, name: &str, template: &str) -> Result<(), CoreError> {
        let route = compile_route(name, template)?;
        let mut routes = self.routes.write().expect("route table lock");
        *routes = Arc::new(routes.with_route(route));
        Ok(())
    }

    pub fn remove_route(&self, name: &str) {
        let mut routes = self.routes.write().expect("route table lock");
        *routes = Arc::new(routes.without_route(name));
    }

    /// Reload the whole table from the registry: every active controller
    /// with a URL. Returns the installed route count.
    pub async fn rebuild_routes(&self, pool: &DbPool) -> Result<usize, CoreError> {
        let controllers = SourceRepo::list_active_by_kind(pool, "controller")
            .await
            .map_err(|err| CoreError::Database(err.to_string()))?;
        let mut routes = Vec::with_capacity(controllers.len());
        for source in &controllers {
            if source.url.is_empty() {
                continue;
            }
            routes.push(compile_route(&source.name, &source.url)?);
        }
        let table = RouteTable::new(routes);
        let count = table.len();
        *self.routes.write().expect("route table lock") = Arc::new(table);
        Ok(count)
    }

    // ---- controller dispatch metadata ----

    pub fn controller_meta(&self, name: &str) -> Option<ControllerMeta> {
        self.controllers
            .read()
            .expect("controller meta lock")
            .get(name)
            .cloned()
    }

    pub fn store_controller_meta(&self, meta: ControllerMeta) {
        self.controllers
            .write()
            .expect("controller meta lock")
            .insert(meta.name.clone(), meta);
    }

    pub fn remove_controller_meta(&self, name: &str) {
        self.controllers
            .write()
            .expect("controller meta lock")
            .remove(name);
    }

    /// Drop every controller's dispatch metadata. Paired with
    /// [`Self::rebuild_routes`] after bulk imports.
    pub fn clear_controllers(&self) {
        self.controllers
            .write()
            .expect("controller meta lock")
            .clear();
    }

    // ---- compiled programs ----

    pub fn module_program(&self, key: &str) -> Option<Arc<Program>> {
        self.modules
            .lock()
            .expect("module cache lock")
            .get(key)
            .cloned()
    }

    pub fn insert_module(&self, key: &str, program: Arc<Program>) {
        self.modules
            .lock()
            .expect("module cache lock")
            .insert(key.to_string(), program);
    }

    pub fn remove_module(&self, key: &str) {
        self.modules.lock().expect("module cache lock").remove(key);
    }

    /// Drop every compiled program. Used after bulk imports, where any
    /// cached entry may be stale.
    pub fn clear_modules(&self) {
        self.modules.lock().expect("module cache lock").clear();
    }

    // ---- daemon registry ----

    pub fn daemon_running(&self, name: &str) -> bool {
        self.daemons
            .lock()
            .expect("daemon registry lock")
            .contains_key(name)
    }

    /// Claim the daemon slot for `name`. False means one is already
    /// registered and the caller must stand down.
    pub fn register_daemon(&self, name: &str, interrupt: Arc<InterruptFlag>) -> bool {
        let mut daemons = self.daemons.lock().expect("daemon registry lock");
        if daemons.contains_key(name) {
            return false;
        }
        daemons.insert(name.to_string(), interrupt);
        true
    }

    pub fn take_daemon(&self, name: &str) -> Option<Arc<InterruptFlag>> {
        self.daemons
            .lock()
            .expect("daemon registry lock")
            .remove(name)
    }

    pub fn daemon_names(&self) -> Vec<String> {
        self.daemons
            .lock()
            .expect("daemon registry lock")
            .keys()
            .cloned()
            .collect()
    }

    // ---- crontab registry ----

    pub fn crontab_scheduled(&self, name: &str) -> bool {
        self.crontabs
            .lock()
            .expect("crontab registry lock")
            .contains_key(name)
    }

    pub fn register_crontab(&self, name: &str, token: CancellationToken) -> bool {
        let mut crontabs = self.crontabs.lock().expect("crontab registry lock");
        if crontabs.contains_key(name) {
            return false;
        }
        crontabs.insert(name.to_string(), token);
        true
    }

    pub fn take_crontab(&self, name: &str) -> Option<CancellationToken> {
        self.crontabs
            .lock()
            .expect("crontab registry lock")
            .remove(name)
    }
}

/// The module-cache key for a stored source.
///
/// Controllers, daemons and crontabs key by kind and name. Modules key
/// the way scripts reference them: `./name` for local modules, the bare
/// name for `node_modules/` ones.
pub fn module_key(kind: &str, name: &str) -> String {
    match kind {
        "module" => match name.strip_prefix("node_modules/") {
            Some(bare) => bare.to_string(),
            None => format!("./{name}"),
        },
        other => format!("./{other}/{name}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
