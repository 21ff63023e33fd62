//! AST-to-visual projection.

use crate::ast::{Ast, Layer, Mapping};
use crate::devices::{pattern_matches, DeviceInfo};
use crate::visual::{DeviceStatus, LayerModel, Scope, ScopeModel, VisualModel};

/// Build the visual model for `ast`, resolving device patterns against
/// `devices`. The active scope is the first one carrying mappings.
pub fn project(ast: &Ast, devices: &[DeviceInfo]) -> VisualModel {
    let mut global = ScopeModel::new(Scope::Global);
    fill(&mut global, &ast.global_mappings, &ast.global_layers);

    let device_scopes = ast
        .device_blocks
        .iter()
        .map(|block| {
            let mut scope = ScopeModel::new(Scope::Device(block.pattern.clone()));
            scope.device = Some(bind(&block.pattern, devices));
            fill(&mut scope, &block.mappings, &block.layers);
            scope
        })
        .collect();

    let mut model = VisualModel {
        global,
        devices: device_scopes,
        active_scope: Scope::Global,
    };
    if let Some(first) = model.auto_selected_scopes().into_iter().next() {
        model.active_scope = first;
    }
    tracing::trace!(
        scopes = model.devices.len() + 1,
        mappings = model.mapping_count(),
        "projected"
    );
    model
}

/// Re-resolve every device scope against a new device list.
pub fn rebind(model: &mut VisualModel, devices: &[DeviceInfo]) {
    for scope in &mut model.devices {
        if let Scope::Device(pattern) = &scope.scope {
            scope.device = Some(bind(pattern, devices));
        }
    }
}

/// First connected match, else first known match (disconnected), else a
/// synthetic disconnected entry.
pub fn bind(pattern: &str, devices: &[DeviceInfo]) -> DeviceStatus {
    let mut matches = devices.iter().filter(|d| pattern_matches(pattern, d));
    let chosen = matches
        .clone()
        .find(|d| d.connected)
        .or_else(|| matches.next());
    match chosen {
        Some(d) => DeviceStatus {
            device_id: Some(d.id.clone()),
            name: d.name.clone(),
            disconnected: !d.connected,
            synthetic: false,
        },
        None => DeviceStatus::unresolved(),
    }
}

fn fill(scope: &mut ScopeModel, mappings: &[Mapping], layers: &[Layer]) {
    insert_all(&mut scope.layers[0], mappings);
    for layer in layers {
        // Duplicate layer names are rejected by validation; merge if one slips through.
        match scope.layer_mut(&layer.name) {
            Some(existing) => insert_all(existing, &layer.mappings),
            None => {
                let mut model = LayerModel::new(layer.name.clone());
                insert_all(&mut model, &layer.mappings);
                scope.layers.push(model);
            }
        }
    }
}

fn insert_all(layer: &mut LayerModel, mappings: &[Mapping]) {
    for m in mappings {
        layer.keys.insert(m.unpositioned());
    }
}
