//! Package factory registry
//!
//! Holds the registered [`PackageFactory`] implementations in
//! registration order plus a lowercased-extension map for fast selection.
//! When a package name carries a recognized extension the map decides;
//! otherwise factories are probed in registration order. Names no factory
//! claims fall back to the host-filesystem package.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::package::host::HostPackage;
use crate::package::{PackageFactory, PackageRef};

pub struct FactoryRegistry {
    factories: Vec<Arc<dyn PackageFactory>>,
    by_type: HashMap<String, Arc<dyn PackageFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        FactoryRegistry {
            factories: Vec::new(),
            by_type: HashMap::new(),
        }
    }

    /// Append a factory. Its extensions are entered into the type map;
    /// the last registration wins per extension.
    pub fn register(&mut self, factory: Arc<dyn PackageFactory>) {
        debug!("registering package factory {}", factory.name());
        for file_type in factory.file_types() {
            self.by_type
                .insert(file_type.to_ascii_lowercase(), Arc::clone(&factory));
        }
        self.factories.push(factory);
    }

    /// Select a factory for `package_name`: by final extension first, then
    /// by probing each factory in registration order.
    pub fn get_factory(&self, package_name: &str) -> Option<Arc<dyn PackageFactory>> {
        if let Some(pos) = package_name.rfind('.') {
            let extension = &package_name[pos + 1..];
            if !extension.is_empty() && !extension.contains(['/', '\\', '*']) {
                if let Some(factory) = self.by_type.get(&extension.to_ascii_lowercase()) {
                    return Some(Arc::clone(factory));
                }
            }
        }

        self.factories
            .iter()
            .find(|factory| factory.is_supported(package_name))
            .cloned()
    }

    /// Construct and scan a package for `name`. With no matching factory
    /// the name is treated as a host-filesystem directory.
    pub fn create_package(&self, name: &str) -> Option<PackageRef> {
        match self.get_factory(name) {
            Some(factory) => {
                let package = factory.create_package(name);
                package.scan().ok()?;
                Some(package)
            }
            None => {
                let package: PackageRef = Arc::new(HostPackage::new(name));
                package.scan().ok()?;
                Some(package)
            }
        }
    }

    pub fn clear(&mut self) {
        self.by_type.clear();
        self.factories.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
