//! The visual key-mapping model the editor renders and mutates.
//!
//! A [`VisualModel`] is derived from an AST by the projector. It is never the
//! source of truth for the DSL grammar, only for editing affordances: every
//! content edit goes through [`VisualModel::apply`], which refuses anything
//! the serializer could not represent.

use crate::ast::{Action, MacroStep, Mapping};
use crate::error::EditError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Name of the default layer every scope has.
pub const BASE_LAYER: &str = "base";

/// `global` or `device:<pattern>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Global,
    Device(String),
}

impl Scope {
    pub fn device(pattern: impl Into<String>) -> Self {
        Scope::Device(pattern.into())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => f.write_str("global"),
            Scope::Device(pattern) => write!(f, "device:{}", pattern),
        }
    }
}

impl FromStr for Scope {
    type Err = EditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Scope::Global),
            _ => match s.strip_prefix("device:") {
                Some(pattern) if !pattern.is_empty() => Ok(Scope::Device(pattern.to_string())),
                _ => Err(EditError::UnknownScope(s.to_string())),
            },
        }
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Source key -> mapping, in insertion order with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct KeyMap {
    entries: Vec<Mapping>,
}

impl KeyMap {
    pub fn get(&self, key: &str) -> Option<&Mapping> {
        self.entries.iter().find(|m| m.source_key == key)
    }

    /// Insert or replace. A replaced key keeps its position.
    pub fn insert(&mut self, mapping: Mapping) -> Option<Mapping> {
        match self.entries.iter_mut().find(|m| m.source_key == mapping.source_key) {
            Some(slot) => Some(std::mem::replace(slot, mapping)),
            None => {
                self.entries.push(mapping);
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Mapping> {
        let at = self.entries.iter().position(|m| m.source_key == key)?;
        Some(self.entries.remove(at))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mapping> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|m| m.source_key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerModel {
    pub name: String,
    pub keys: KeyMap,
}

impl LayerModel {
    pub fn new(name: impl Into<String>) -> Self {
        LayerModel {
            name: name.into(),
            keys: KeyMap::default(),
        }
    }
}

/// How a device scope's pattern resolved against the device registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    /// Registry id of the bound device, if any device matched.
    pub device_id: Option<String>,
    pub name: Option<String>,
    /// No connected device matches the pattern.
    pub disconnected: bool,
    /// No known device matches at all; the entry exists only so its mappings
    /// stay editable.
    pub synthetic: bool,
}

impl DeviceStatus {
    pub fn unresolved() -> Self {
        DeviceStatus {
            device_id: None,
            name: None,
            disconnected: true,
            synthetic: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeModel {
    pub scope: Scope,
    /// `None` for the global scope.
    pub device: Option<DeviceStatus>,
    /// `layers[0]` is always the base layer.
    pub layers: Vec<LayerModel>,
    pub active_layer: String,
}

impl ScopeModel {
    pub fn new(scope: Scope) -> Self {
        let device = match scope {
            Scope::Global => None,
            Scope::Device(_) => Some(DeviceStatus::unresolved()),
        };
        ScopeModel {
            scope,
            device,
            layers: vec![LayerModel::new(BASE_LAYER)],
            active_layer: BASE_LAYER.to_string(),
        }
    }

    pub fn layer(&self, name: &str) -> Option<&LayerModel> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut LayerModel> {
        self.layers.iter_mut().find(|l| l.name == name)
    }

    pub fn base(&self) -> &LayerModel {
        &self.layers[0]
    }

    /// Declared layers, excluding the base layer.
    pub fn named_layers(&self) -> &[LayerModel] {
        &self.layers[1..]
    }

    pub fn mapping_count(&self) -> usize {
        self.layers.iter().map(|l| l.keys.len()).sum()
    }

    pub fn has_mappings(&self) -> bool {
        self.layers.iter().any(|l| !l.keys.is_empty())
    }

    /// True when the scope has nothing to write out.
    pub fn is_empty(&self) -> bool {
        !self.has_mappings() && self.layers.len() == 1
    }

    pub fn is_disconnected(&self) -> bool {
        self.device.as_ref().map_or(false, |d| d.disconnected)
    }

    pub fn pattern(&self) -> Option<&str> {
        match &self.scope {
            Scope::Device(p) => Some(p),
            Scope::Global => None,
        }
    }
}

/// A content edit made through the visual editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisualEdit {
    SetMapping {
        scope: Scope,
        layer: String,
        mapping: Mapping,
    },
    RemoveMapping {
        scope: Scope,
        layer: String,
        key: String,
    },
    AddDevice {
        pattern: String,
    },
    RemoveDevice {
        pattern: String,
    },
    AddLayer {
        scope: Scope,
        name: String,
    },
    RemoveLayer {
        scope: Scope,
        name: String,
    },
    /// Rename a layer and retarget the `layer_switch` mappings that refer
    /// to it. Renaming a global layer also retargets device scopes that do
    /// not declare a layer of that name themselves.
    RenameLayer {
        scope: Scope,
        from: String,
        to: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualModel {
    pub global: ScopeModel,
    /// Device scopes in document order.
    pub devices: Vec<ScopeModel>,
    pub active_scope: Scope,
}

impl Default for VisualModel {
    fn default() -> Self {
        VisualModel {
            global: ScopeModel::new(Scope::Global),
            devices: Vec::new(),
            active_scope: Scope::Global,
        }
    }
}

impl VisualModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Global scope first, then device scopes in document order.
    pub fn scopes(&self) -> impl Iterator<Item = &ScopeModel> {
        std::iter::once(&self.global).chain(self.devices.iter())
    }

    pub fn scope(&self, scope: &Scope) -> Option<&ScopeModel> {
        match scope {
            Scope::Global => Some(&self.global),
            Scope::Device(p) => self.devices.iter().find(|d| d.pattern() == Some(p)),
        }
    }

    pub fn scope_mut(&mut self, scope: &Scope) -> Option<&mut ScopeModel> {
        match scope {
            Scope::Global => Some(&mut self.global),
            Scope::Device(p) => self.devices.iter_mut().find(|d| d.pattern() == Some(p)),
        }
    }

    pub fn active(&self) -> &ScopeModel {
        self.scope(&self.active_scope).unwrap_or(&self.global)
    }

    /// Scopes that carry mappings; the editor pre-selects these.
    pub fn auto_selected_scopes(&self) -> Vec<Scope> {
        self.scopes()
            .filter(|s| s.has_mappings())
            .map(|s| s.scope.clone())
            .collect()
    }

    pub fn mapping_count(&self) -> usize {
        self.scopes().map(ScopeModel::mapping_count).sum()
    }

    pub fn select_scope(&mut self, scope: &Scope) -> Result<(), EditError> {
        if self.scope(scope).is_none() {
            return Err(EditError::UnknownScope(scope.to_string()));
        }
        self.active_scope = scope.clone();
        Ok(())
    }

    pub fn select_layer(&mut self, scope: &Scope, layer: &str) -> Result<(), EditError> {
        let s = self
            .scope_mut(scope)
            .ok_or_else(|| EditError::UnknownScope(scope.to_string()))?;
        if s.layer(layer).is_none() {
            return Err(unknown_layer(scope, layer));
        }
        s.active_layer = layer.to_string();
        Ok(())
    }

    /// Carry the selection of `previous` over where it still applies;
    /// otherwise select the first auto-selected scope (global if none).
    pub fn restore_selection(&mut self, previous: &VisualModel) {
        for prev in previous.scopes() {
            if let Some(scope) = self.scope_mut(&prev.scope) {
                if scope.layer(&prev.active_layer).is_some() {
                    scope.active_layer = prev.active_layer.clone();
                }
            }
        }
        self.active_scope = if self.scope(&previous.active_scope).is_some() {
            previous.active_scope.clone()
        } else {
            self.auto_selected_scopes()
                .into_iter()
                .next()
                .unwrap_or(Scope::Global)
        };
    }

    /// Apply a content edit. The model is unchanged when an error is returned.
    pub fn apply(&mut self, edit: VisualEdit) -> Result<(), EditError> {
        match edit {
            VisualEdit::SetMapping { scope, layer, mapping } => {
                check_mapping(&mapping)?;
                let target = self.layer_mut(&scope, &layer)?;
                target.keys.insert(mapping.unpositioned());
            }
            VisualEdit::RemoveMapping { scope, layer, key } => {
                let target = self.layer_mut(&scope, &layer)?;
                if target.keys.remove(&key).is_none() {
                    return Err(EditError::UnknownKey {
                        scope: scope.to_string(),
                        layer,
                        key,
                    });
                }
            }
            VisualEdit::AddDevice { pattern } => {
                check_name("device pattern", &pattern)?;
                let scope = Scope::Device(pattern.clone());
                if self.scope(&scope).is_some() {
                    return Err(EditError::DeviceExists(pattern));
                }
                self.devices.push(ScopeModel::new(scope));
            }
            VisualEdit::RemoveDevice { pattern } => {
                let at = self
                    .devices
                    .iter()
                    .position(|d| d.pattern() == Some(pattern.as_str()))
                    .ok_or_else(|| EditError::UnknownScope(Scope::Device(pattern.clone()).to_string()))?;
                self.devices.remove(at);
                if self.active_scope == Scope::Device(pattern) {
                    self.active_scope = Scope::Global;
                }
            }
            VisualEdit::AddLayer { scope, name } => {
                check_name("layer name", &name)?;
                let label = scope.to_string();
                let s = self
                    .scope_mut(&scope)
                    .ok_or_else(|| EditError::UnknownScope(label.clone()))?;
                if s.layer(&name).is_some() {
                    return Err(EditError::LayerExists { scope: label, layer: name });
                }
                s.layers.push(LayerModel::new(name));
            }
            VisualEdit::RemoveLayer { scope, name } => {
                if name == BASE_LAYER {
                    return Err(EditError::BaseLayer);
                }
                let s = self
                    .scope_mut(&scope)
                    .ok_or_else(|| EditError::UnknownScope(scope.to_string()))?;
                let at = s
                    .layers
                    .iter()
                    .position(|l| l.name == name)
                    .ok_or_else(|| unknown_layer(&scope, &name))?;
                s.layers.remove(at);
                if s.active_layer == name {
                    s.active_layer = BASE_LAYER.to_string();
                }
            }
            VisualEdit::RenameLayer { scope, from, to } => {
                if from == BASE_LAYER {
                    return Err(EditError::BaseLayer);
                }
                check_name("layer name", &to)?;
                let label = scope.to_string();
                let s = self
                    .scope_mut(&scope)
                    .ok_or_else(|| EditError::UnknownScope(label.clone()))?;
                if s.layer(&to).is_some() {
                    return Err(EditError::LayerExists { scope: label, layer: to });
                }
                let layer = s.layer_mut(&from).ok_or_else(|| unknown_layer(&scope, &from))?;
                layer.name = to.clone();
                if s.active_layer == from {
                    s.active_layer = to.clone();
                }
                retarget(s, &from, &to);
                if scope == Scope::Global {
                    for device in &mut self.devices {
                        if device.layer(&from).is_none() {
                            retarget(device, &from, &to);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn layer_mut(&mut self, scope: &Scope, layer: &str) -> Result<&mut LayerModel, EditError> {
        let s = self
            .scope_mut(scope)
            .ok_or_else(|| EditError::UnknownScope(scope.to_string()))?;
        s.layer_mut(layer).ok_or_else(|| unknown_layer(scope, layer))
    }
}

/// Point every `layer_switch` to `from` in `scope` at `to`.
fn retarget(scope: &mut ScopeModel, from: &str, to: &str) {
    for layer in &mut scope.layers {
        for m in &mut layer.keys.entries {
            if let Action::LayerSwitch { target_layer } = &mut m.action {
                if target_layer == from {
                    *target_layer = to.to_string();
                }
            }
        }
    }
}

fn unknown_layer(scope: &Scope, layer: &str) -> EditError {
    EditError::UnknownLayer {
        scope: scope.to_string(),
        layer: layer.to_string(),
    }
}

fn check_name(what: &str, value: &str) -> Result<(), EditError> {
    if value.is_empty() {
        return Err(EditError::InvalidValue(format!("{} must not be empty", what)));
    }
    if value.contains('\r') {
        return Err(EditError::InvalidValue(format!("{} must not contain a carriage return", what)));
    }
    Ok(())
}

fn check_ms(what: &str, ms: u32, min: u32) -> Result<(), EditError> {
    if ms < min || ms > u16::MAX as u32 {
        return Err(EditError::InvalidValue(format!(
            "{} must be {}-{} ms, got {}",
            what,
            min,
            u16::MAX,
            ms
        )));
    }
    Ok(())
}

/// Everything the serializer needs to write the mapping back out.
pub fn check_mapping(mapping: &Mapping) -> Result<(), EditError> {
    check_name("source key", &mapping.source_key)?;
    match &mapping.action {
        Action::Simple { target_key } => check_name("target key", target_key),
        Action::TapHold {
            tap,
            hold,
            threshold_ms,
        } => {
            check_name("tap key", tap)?;
            check_name("hold action", hold)?;
            check_ms("tap-hold threshold", *threshold_ms, 1)
        }
        Action::LayerSwitch { target_layer } => check_name("target layer", target_layer),
        Action::ModifiedOutput { target_key, .. } => check_name("target key", target_key),
        Action::Macro { steps } => steps.iter().try_for_each(|step| match step {
            MacroStep::Press(k) | MacroStep::Release(k) | MacroStep::Tap(k) => check_name("macro key", k),
            MacroStep::Wait(ms) => check_ms("macro wait", *ms, 0),
        }),
    }
}
