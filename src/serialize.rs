//! Visual model back to DSL text.

use crate::ast::{Ast, DeviceBlock, Layer, Mapping};
use crate::error::SerializeError;
use crate::render::{render, CommentAnchors};
use crate::visual::{check_mapping, LayerModel, ScopeModel, VisualModel};
use serde::Serialize;
use std::collections::HashSet;

/// Generated text together with the AST that parsing it yields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Serialized {
    pub source: String,
    pub ast: Ast,
}

/// Regenerate DSL text for `model`, carrying imports and comments over from
/// `prior`.
pub fn serialize(model: &VisualModel, prior: &Ast) -> Result<Serialized, SerializeError> {
    let doc = lower(model, prior)?;
    let anchors = CommentAnchors::collect(prior);
    let (source, ast) = render(&doc, anchors);
    tracing::trace!(bytes = source.len(), mappings = model.mapping_count(), "serialized");
    Ok(Serialized { source, ast })
}

/// The document a model describes: one block per non-empty device scope,
/// base-layer mappings before declared layers, keys in insertion order.
pub fn lower(model: &VisualModel, prior: &Ast) -> Result<Ast, SerializeError> {
    let (global_mappings, global_layers) = lower_scope(&model.global)?;

    let mut patterns = HashSet::new();
    let mut device_blocks = Vec::new();
    for scope in &model.devices {
        let pattern = scope
            .pattern()
            .ok_or_else(|| SerializeError::Unrepresentable("global scope listed as a device".to_string()))?;
        if pattern.is_empty() {
            return Err(SerializeError::Unrepresentable("empty device pattern".to_string()));
        }
        if !patterns.insert(pattern) {
            return Err(SerializeError::DuplicateDevice(pattern.to_string()));
        }
        if scope.is_empty() {
            continue;
        }
        let (mappings, layers) = lower_scope(scope)?;
        device_blocks.push(DeviceBlock {
            pattern: pattern.to_string(),
            mappings,
            layers,
            start_line: 0,
            start_column: 0,
            end_line: 0,
            end_column: 0,
        });
    }

    Ok(Ast {
        imports: prior.imports.clone(),
        global_mappings,
        global_layers,
        device_blocks,
        comments: Vec::new(),
    })
}

fn lower_scope(scope: &ScopeModel) -> Result<(Vec<Mapping>, Vec<Layer>), SerializeError> {
    let mappings = lower_keys(&scope.layers[0])?;
    let mut names = HashSet::new();
    let layers = scope
        .named_layers()
        .iter()
        .map(|layer| {
            if layer.name.is_empty() {
                return Err(SerializeError::Unrepresentable(format!("empty layer name in {}", scope.scope)));
            }
            if !names.insert(layer.name.as_str()) {
                return Err(SerializeError::Unrepresentable(format!(
                    "layer {:?} appears twice in {}",
                    layer.name, scope.scope
                )));
            }
            Ok(Layer {
                name: layer.name.clone(),
                mappings: lower_keys(layer)?,
                start_line: 0,
                start_column: 0,
                end_line: 0,
                end_column: 0,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((mappings, layers))
}

fn lower_keys(layer: &LayerModel) -> Result<Vec<Mapping>, SerializeError> {
    layer
        .keys
        .iter()
        .map(|m| {
            check_mapping(m).map_err(|e| SerializeError::Unrepresentable(e.to_string()))?;
            Ok(m.unpositioned())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::project::project;
    use crate::visual::{Scope, VisualEdit, BASE_LAYER};

    #[test]
    fn empty_device_scopes_are_omitted() {
        let prior = Ast::default();
        let mut model = VisualModel::new();
        model.apply(VisualEdit::AddDevice { pattern: "SN-1".into() }).unwrap();
        let out = serialize(&model, &prior).unwrap();
        assert_eq!(out.source, "");
        assert!(out.ast.device_blocks.is_empty());
    }

    #[test]
    fn imports_and_unrelated_comments_survive_an_edit() {
        let src = "import \"common.rhai\";\n\n// swap\nmap(\"A\", \"B\");\n";
        let prior = parse(src).unwrap();
        let mut model = project(&prior, &[]);
        model
            .apply(VisualEdit::SetMapping {
                scope: Scope::Global,
                layer: BASE_LAYER.into(),
                mapping: Mapping::simple("C", "D"),
            })
            .unwrap();
        let out = serialize(&model, &prior).unwrap();
        assert_eq!(
            out.source,
            "import \"common.rhai\";\n\n// swap\nmap(\"A\", \"B\");\nmap(\"C\", \"D\");\n"
        );
        assert_eq!(parse(&out.source).unwrap(), out.ast);
    }

    #[test]
    fn unchanged_model_reproduces_canonical_text() {
        let src = "map(\"A\", \"B\");\n\ndevice(\"SN-1\") {\n    layer(\"nav\") {\n        map(\"H\", \"Left\");\n    }\n}\n";
        let prior = parse(src).unwrap();
        let out = serialize(&project(&prior, &[]), &prior).unwrap();
        assert_eq!(out.source, src);
        assert_eq!(out.ast, prior);
    }

    #[test]
    fn duplicate_device_scope_is_refused() {
        let mut model = VisualModel::new();
        model.devices.push(ScopeModel::new(Scope::device("X")));
        model.devices.push(ScopeModel::new(Scope::device("X")));
        assert_eq!(
            serialize(&model, &Ast::default()),
            Err(SerializeError::DuplicateDevice("X".into()))
        );
    }
}
