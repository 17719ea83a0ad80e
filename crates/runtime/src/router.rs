//! Request path routing for controllers.
//!
//! A controller's `url` is a template where `{name}` segments capture
//! path text. Templates compile to anchored regular expressions with
//! lazy named groups, so `/files/{path}` captures across slashes and
//! `/pair/{a}/{b}` splits at the first separator. Text outside the
//! placeholders is used verbatim.
//!
//! Overlapping templates resolve most-specific-first: fewer
//! placeholders outrank more, longer literal text breaks ties. The
//! order is a function of the templates alone, so a table rebuilt from
//! the registry at boot matches exactly like one grown through admin
//! edits.

use indexmap::IndexMap;
use regex::Regex;

use plinth_core::error::CoreError;

/// Matches `{name}` placeholders in a route template.
const PLACEHOLDER: &str = r"\{(.*?)\}";

#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    pub template: String,
    pattern: Regex,
    /// Placeholder count; primary specificity key.
    placeholders: usize,
    /// Bytes of literal template text; secondary specificity key.
    literal_len: usize,
}

/// Compile a controller's URL template.
///
/// Fails with [`CoreError::Validation`] when the template does not form
/// a valid pattern, e.g. a placeholder name that cannot be a capture
/// group. Admin writes validate here, so a stored template is always
/// compilable again at boot.
pub fn compile_route(name: &str, template: &str) -> Result<Route, CoreError> {
    let placeholder = Regex::new(PLACEHOLDER).expect("placeholder pattern");
    let rewritten = placeholder.replace_all(template, "(?P<${1}>.*?)");
    let pattern = Regex::new(&format!("^{rewritten}$")).map_err(|err| {
        CoreError::Validation(format!("invalid route template {template:?}: {err}"))
    })?;
    let placeholders = placeholder.find_iter(template).count();
    let placeholder_len: usize = placeholder
        .find_iter(template)
        .map(|m| m.as_str().len())
        .sum();
    Ok(Route {
        name: name.to_string(),
        template: template.to_string(),
        pattern,
        placeholders,
        literal_len: template.len() - placeholder_len,
    })
}

#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Controller name the route belongs to.
    pub name: String,
    /// Captured path variables in template order.
    pub bindings: IndexMap<String, String>,
}

/// Immutable route table snapshot. Mutation builds a new table so
/// in-flight lookups keep a consistent view.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    /// Kept sorted most-specific-first.
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(mut routes: Vec<Route>) -> Self {
        routes.sort_by(|a, b| {
            a.placeholders
                .cmp(&b.placeholders)
                .then(b.literal_len.cmp(&a.literal_len))
                .then_with(|| a.template.cmp(&b.template))
                .then_with(|| a.name.cmp(&b.name))
        });
        Self { routes }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First route whose pattern matches `path`, with its bindings.
    pub fn match_path(&self, path: &str) -> Option<RouteMatch> {
        for route in &self.routes {
            if let Some(captures) = route.pattern.captures(path) {
                let mut bindings = IndexMap::new();
                for group in route.pattern.capture_names().flatten() {
                    if let Some(value) = captures.name(group) {
                        bindings.insert(group.to_string(), value.as_str().to_string());
                    }
                }
                return Some(RouteMatch {
                    name: route.name.clone(),
                    bindings,
                });
            }
        }
        None
    }

    /// Copy of this table with `route` added, replacing the same
    /// controller's previous entry.
    pub fn with_route(&self, route: Route) -> RouteTable {
        let mut routes: Vec<Route> = self
            .routes
            .iter()
            .filter(|r| r.name != route.name)
            .cloned()
            .collect();
        routes.push(route);
        RouteTable::new(routes)
    }

    /// Copy of this table without the named controller's route.
    pub fn without_route(&self, name: &str) -> RouteTable {
        RouteTable {
            routes: self
                .routes
                .iter()
                .filter(|r| r.name != name)
                .cloned()
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
