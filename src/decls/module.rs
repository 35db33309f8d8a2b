use tracing::trace;

use super::{
    AccessorInfo, AccessorKind, AttrId, AttributeKind, Decl, DeclAttribute, DeclContext, DeclId, FunctionDecl, ParamDecl,
    StorageDecl,
};
use crate::types::Type;

/// Name-lookup oracle: declarations named `name` visible from `context`.
pub trait NameLookup {
    fn lookup_value(&self, name: &str, context: &DeclContext) -> Vec<DeclId>;
}

/// Declarations of one compilation unit, addressed by [`DeclId`].
#[derive(Clone, Debug, Default)]
pub struct SourceModule {
    name: String,
    decls: Vec<Decl>,
}

impl SourceModule {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decls: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_function(&mut self, mut function: FunctionDecl) -> DeclId {
        let id = DeclId(self.decls.len());
        function.id = id;
        trace!(target: "autodiff.decls", id = id.0, name = %function.full_name(), "declared function");
        self.decls.push(Decl::Function(function));
        id
    }

    /// Add a property or subscript together with its accessors.
    pub fn add_storage(&mut self, mut storage: StorageDecl) -> DeclId {
        let id = DeclId(self.decls.len());
        storage.id = id;
        let has_getter = storage.has_getter;
        let has_setter = storage.has_setter;
        self.decls.push(Decl::Storage(storage.clone()));

        let getter = has_getter.then(|| {
            let getter = accessor_for(&storage, AccessorKind::Getter);
            self.add_function(getter)
        });
        let setter = has_setter.then(|| {
            let setter = accessor_for(&storage, AccessorKind::Setter);
            self.add_function(setter)
        });
        if let Some(Decl::Storage(stored)) = self.decls.get_mut(id.0) {
            stored.getter = getter;
            stored.setter = setter;
        }
        id
    }

    #[must_use]
    pub fn decl(&self, id: DeclId) -> Option<&Decl> {
        self.decls.get(id.0)
    }

    pub fn decl_mut(&mut self, id: DeclId) -> Option<&mut Decl> {
        self.decls.get_mut(id.0)
    }

    #[must_use]
    pub fn function(&self, id: DeclId) -> Option<&FunctionDecl> {
        self.decl(id).and_then(Decl::as_function)
    }

    pub fn function_mut(&mut self, id: DeclId) -> Option<&mut FunctionDecl> {
        match self.decls.get_mut(id.0) {
            Some(Decl::Function(function)) => Some(function),
            _ => None,
        }
    }

    #[must_use]
    pub fn storage(&self, id: DeclId) -> Option<&StorageDecl> {
        self.decl(id).and_then(Decl::as_storage)
    }

    pub fn decls(&self) -> impl Iterator<Item = &Decl> {
        self.decls.iter()
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.decls.iter().filter_map(Decl::as_function)
    }

    #[must_use]
    pub fn decl_ids(&self) -> Vec<DeclId> {
        (0..self.decls.len()).map(DeclId).collect()
    }

    /// First function with the given full name (`name(labels:)`) or base name.
    #[must_use]
    pub fn find_function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions()
            .filter(|function| function.accessor.is_none())
            .find(|function| function.full_name() == name || function.name == name)
    }

    #[must_use]
    pub fn attributes(&self, id: DeclId) -> &[DeclAttribute] {
        self.decl(id).map_or(&[], Decl::attributes)
    }

    pub fn add_attribute(&mut self, id: DeclId, attribute: DeclAttribute) {
        if let Some(decl) = self.decl_mut(id) {
            decl.attributes_mut().push(attribute);
        }
    }

    #[must_use]
    pub fn attribute(&self, decl: DeclId, attr: AttrId) -> Option<&DeclAttribute> {
        self.attributes(decl)
            .iter()
            .find(|attribute| attribute.id == attr)
    }

    pub fn attribute_mut(&mut self, decl: DeclId, attr: AttrId) -> Option<&mut DeclAttribute> {
        self.decl_mut(decl)?
            .attributes_mut()
            .iter_mut()
            .find(|attribute| attribute.id == attr)
    }

    /// Replace the attribute sharing `attribute.id`; returns false if absent.
    pub fn replace_attribute(&mut self, decl: DeclId, attribute: DeclAttribute) -> bool {
        let Some(decl) = self.decl_mut(decl) else {
            return false;
        };
        match decl
            .attributes_mut()
            .iter_mut()
            .find(|existing| existing.id == attribute.id)
        {
            Some(slot) => {
                *slot = attribute;
                true
            }
            None => false,
        }
    }

    pub fn remove_attribute(&mut self, decl: DeclId, attr: AttrId) -> Option<DeclAttribute> {
        let attributes = self.decl_mut(decl)?.attributes_mut();
        let position = attributes.iter().position(|attribute| attribute.id == attr)?;
        Some(attributes.remove(position))
    }
}

impl NameLookup for SourceModule {
    /// Members of the enclosing type plus module-scope declarations.
    /// Accessors are reached through their storage, not by name.
    fn lookup_value(&self, name: &str, context: &DeclContext) -> Vec<DeclId> {
        self.decls
            .iter()
            .filter(|decl| decl.name() == name)
            .filter(|decl| {
                !matches!(decl, Decl::Function(function) if function.accessor.is_some())
            })
            .filter(|decl| match decl.context() {
                DeclContext::Module => true,
                member => member.same_context(context),
            })
            .map(Decl::id)
            .collect()
    }
}

fn accessor_for(storage: &StorageDecl, kind: AccessorKind) -> FunctionDecl {
    let (params, result) = match kind {
        AccessorKind::Getter => (storage.indices.clone(), storage.ty.clone()),
        AccessorKind::Setter => {
            let mut params = vec![ParamDecl::new("newValue", storage.ty.clone())];
            params.extend(storage.indices.iter().cloned());
            (params, Type::unit())
        }
    };
    let mut function = FunctionDecl::new(storage.name.clone(), params, result)
        .in_context(storage.context.clone())
        .with_access(storage.access)
        .in_file(storage.file);
    function.is_static = storage.is_static;
    function.span = storage.span;
    function.accessor = Some(AccessorInfo {
        storage: storage.id,
        kind,
    });
    if kind == AccessorKind::Setter && storage.context.type_context().is_some() {
        function.attributes.push(DeclAttribute::new(AttributeKind::Mutating).implicit());
    }
    function
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn storage_gets_accessors() {
        let mut module = SourceModule::new("main");
        let point = Type::structure("Point");
        let id = module.add_storage(
            StorageDecl::computed("magnitude", Type::float())
                .in_context(DeclContext::in_type(point))
                .settable(),
        );
        let storage = module.storage(id).expect("storage");
        let getter = module
            .function(storage.getter.expect("getter"))
            .expect("getter decl");
        assert_eq!(getter.interface_type().to_string(), "(Point) -> () -> Float");
        assert_eq!(getter.ir_name(), "Point.magnitude().get");
        let setter = module
            .function(storage.setter.expect("setter"))
            .expect("setter decl");
        assert!(setter.is_setter());
        assert_eq!(setter.interface_type().to_string(), "(inout Point) -> (Float) -> ()");
    }

    #[test]
    fn lookup_sees_members_and_module_scope() {
        let mut module = SourceModule::new("main");
        let point = Type::structure("Point");
        let member = module.add_function(
            FunctionDecl::new("norm", Vec::new(), Type::float())
                .in_context(DeclContext::in_type(point.clone())),
        );
        let global = module.add_function(FunctionDecl::new(
            "norm",
            vec![ParamDecl::new("p", point.clone())],
            Type::float(),
        ));
        let other = module.add_function(
            FunctionDecl::new("norm", Vec::new(), Type::float())
                .in_context(DeclContext::in_type(Type::structure("Vector"))),
        );
        let from_point = module.lookup_value("norm", &DeclContext::in_type(point));
        assert_eq!(from_point, vec![member, global]);
        assert!(!from_point.contains(&other));
        assert_eq!(module.lookup_value("norm", &DeclContext::Module), vec![global]);
        assert!(module.lookup_value("missing", &DeclContext::Module).is_empty());
    }
}
