//! Component descriptors, hooks and the registered component set
//!
//! A [`ComponentSet`] is built once at startup from the catalog and never
//! changes afterwards. Every campaign walks it in registration order (or the
//! reverse, for uninstall).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_common::crd::PlatformSpec;
use conductor_common::{Error, Result};

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::probe::SelfHealingProbe;

/// Lifecycle direction of a campaign
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Bring components up
    Install,
    /// Move installed components to a new version
    Upgrade,
    /// Tear components down
    Uninstall,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Upgrade => write!(f, "upgrade"),
            Self::Uninstall => write!(f, "uninstall"),
        }
    }
}

/// What a hook gets to see about the campaign it runs in
#[derive(Clone, Debug)]
pub struct ComponentContext {
    /// "namespace/name" of the owning Platform
    pub platform: String,
    /// Direction of the running campaign
    pub operation: Operation,
    /// Desired state of the owning Platform
    pub spec: PlatformSpec,
    /// When set, hooks must not mutate the cluster
    pub dry_run: bool,
}

impl ComponentContext {
    /// Context for a campaign on `platform`
    pub fn new(platform: impl Into<String>, operation: Operation) -> Self {
        Self {
            platform: platform.into(),
            operation,
            spec: PlatformSpec::default(),
            dry_run: false,
        }
    }

    /// Attach the Platform spec
    pub fn with_spec(mut self, spec: PlatformSpec) -> Self {
        self.spec = spec;
        self
    }

    /// Enable dry-run mode
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Whether the Platform switched this component off
    pub fn is_disabled(&self, component: &str) -> bool {
        self.spec.is_disabled(component)
    }
}

/// Lifecycle hooks of one component
///
/// Pre and post hooks default to no-ops and `upgrade` defaults to `install`,
/// so a minimal component only implements `install`, `uninstall`,
/// `is_installed` and `is_ready`. Errors are opaque to the state machines
/// apart from [`Error::is_retryable`].
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ComponentHooks: Send + Sync {
    /// Runs once before the first successful `install`
    async fn pre_install(&self, _ctx: &ComponentContext) -> Result<()> {
        Ok(())
    }

    /// Start installing the component; must be idempotent
    async fn install(&self, ctx: &ComponentContext) -> Result<()>;

    /// Runs once the component reports ready after an install
    async fn post_install(&self, _ctx: &ComponentContext) -> Result<()> {
        Ok(())
    }

    /// Runs once before the first successful `upgrade`
    async fn pre_upgrade(&self, _ctx: &ComponentContext) -> Result<()> {
        Ok(())
    }

    /// Start upgrading the component
    async fn upgrade(&self, ctx: &ComponentContext) -> Result<()> {
        self.install(ctx).await
    }

    /// Runs once the component reports ready after an upgrade
    async fn post_upgrade(&self, _ctx: &ComponentContext) -> Result<()> {
        Ok(())
    }

    /// Runs once before the first successful `uninstall`
    async fn pre_uninstall(&self, _ctx: &ComponentContext) -> Result<()> {
        Ok(())
    }

    /// Start removing the component; must be idempotent
    async fn uninstall(&self, ctx: &ComponentContext) -> Result<()>;

    /// Runs once the component is gone
    async fn post_uninstall(&self, _ctx: &ComponentContext) -> Result<()> {
        Ok(())
    }

    /// Whether any part of the component exists in the cluster
    async fn is_installed(&self, ctx: &ComponentContext) -> Result<bool>;

    /// Whether the component is serving
    async fn is_ready(&self, ctx: &ComponentContext) -> bool;
}

/// Static metadata of a component
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentDescriptor {
    /// Unique component name
    pub name: String,
    /// Components that must be ready before this one installs
    pub dependencies: Vec<String>,
    /// The operator may install and upgrade this component
    pub supports_operator_install: bool,
    /// The operator may uninstall this component
    pub supports_operator_uninstall: bool,
}

impl ComponentDescriptor {
    /// Descriptor with no dependencies and both capabilities enabled
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            supports_operator_install: true,
            supports_operator_uninstall: true,
        }
    }

    /// Declare dependencies
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Set the install capability
    pub fn operator_install(mut self, supported: bool) -> Self {
        self.supports_operator_install = supported;
        self
    }

    /// Set the uninstall capability
    pub fn operator_uninstall(mut self, supported: bool) -> Self {
        self.supports_operator_uninstall = supported;
        self
    }
}

/// A descriptor bound to its hooks and optional probe
#[derive(Clone)]
pub struct RegisteredComponent {
    /// Static metadata
    pub descriptor: ComponentDescriptor,
    /// Lifecycle hooks
    pub hooks: Arc<dyn ComponentHooks>,
    /// Self-healing probe evaluated on every reconcile
    pub probe: Option<Arc<SelfHealingProbe>>,
}

impl RegisteredComponent {
    /// Component name
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

impl fmt::Debug for RegisteredComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredComponent")
            .field("descriptor", &self.descriptor)
            .field("probe", &self.probe.is_some())
            .finish()
    }
}

/// Iteration order of an uninstall campaign
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UninstallOrder {
    /// Dependents before their dependencies
    #[default]
    Reverse,
    /// Same order as install
    Registration,
}

impl FromStr for UninstallOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "reverse" => Ok(Self::Reverse),
            "registration" => Ok(Self::Registration),
            other => Err(format!(
                "unknown uninstall order '{other}', expected 'reverse' or 'registration'"
            )),
        }
    }
}

impl fmt::Display for UninstallOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reverse => write!(f, "reverse"),
            Self::Registration => write!(f, "registration"),
        }
    }
}

/// Immutable, ordered collection of registered components
#[derive(Debug, Default)]
pub struct ComponentSet {
    components: Vec<RegisteredComponent>,
    index: HashMap<String, usize>,
}

impl ComponentSet {
    /// Start registering components
    pub fn builder() -> ComponentSetBuilder {
        ComponentSetBuilder::default()
    }

    /// Components in registration order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &RegisteredComponent> {
        self.components.iter()
    }

    /// Components in uninstall order
    pub fn in_order(&self, order: UninstallOrder) -> Vec<&RegisteredComponent> {
        match order {
            UninstallOrder::Registration => self.components.iter().collect(),
            UninstallOrder::Reverse => self.components.iter().rev().collect(),
        }
    }

    /// Look a component up by name
    pub fn get(&self, name: &str) -> Option<&RegisteredComponent> {
        self.index.get(name).map(|&i| &self.components[i])
    }

    /// Number of registered components
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Component names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name()).collect()
    }
}

/// Builder for [`ComponentSet`]
#[derive(Default)]
pub struct ComponentSetBuilder {
    components: Vec<RegisteredComponent>,
}

impl ComponentSetBuilder {
    /// Register a component after all previously registered ones
    pub fn register(self, descriptor: ComponentDescriptor, hooks: Arc<dyn ComponentHooks>) -> Self {
        self.register_with_probe(descriptor, hooks, None)
    }

    /// Register a component together with its self-healing probe
    pub fn register_with_probe(
        mut self,
        descriptor: ComponentDescriptor,
        hooks: Arc<dyn ComponentHooks>,
        probe: Option<SelfHealingProbe>,
    ) -> Self {
        self.components.push(RegisteredComponent {
            descriptor,
            hooks,
            probe: probe.map(Arc::new),
        });
        self
    }

    /// Validate and freeze the set
    ///
    /// Names must be unique and non-empty. Dependencies must name a component
    /// registered earlier, which also rules out cycles.
    pub fn build(self) -> Result<ComponentSet> {
        let mut index = HashMap::with_capacity(self.components.len());
        for (i, component) in self.components.iter().enumerate() {
            let name = component.name();
            if name.is_empty() {
                return Err(Error::validation_for_field(
                    format!("components[{i}]"),
                    "name",
                    "component name must not be empty",
                ));
            }
            for dep in &component.descriptor.dependencies {
                if dep == name {
                    return Err(Error::validation_for_field(
                        name,
                        "dependencies",
                        "component cannot depend on itself",
                    ));
                }
                if !index.contains_key(dep.as_str()) {
                    return Err(Error::validation_for_field(
                        name,
                        "dependencies",
                        format!("dependency '{dep}' must be registered before '{name}'"),
                    ));
                }
            }
            if index.insert(name.to_string(), i).is_some() {
                return Err(Error::validation_for(name, "component registered twice"));
            }
        }
        Ok(ComponentSet {
            components: self.components,
            index,
        })
    }
}
