//! Source-code indexing: scanner, dependency graph, and context expansion.

pub mod expand;
pub mod graph;
pub mod scanner;

use chrono::{DateTime, Utc};

use crate::memory::types::{CodeMeta, CodeUnitKind, Fragment, MemoryClass};
use self::graph::resolve_dependency;
use self::scanner::{ScannedFunction, ScannedModule};

/// Turn one scan into code-unit fragments tagged with `run`.
///
/// Each module yields a module unit plus one unit per class, function and
/// method. Module units carry their resolved dependents so the stored
/// metadata is complete even without the graph.
pub fn unit_fragments(modules: &[ScannedModule], run: u64, at: DateTime<Utc>) -> Vec<Fragment> {
    let names: Vec<&str> = modules.iter().map(|m| m.module.as_str()).collect();
    let mut fragments = Vec::new();

    for module in modules {
        let dependents: Vec<String> = modules
            .iter()
            .filter(|other| other.module != module.module)
            .filter(|other| {
                other
                    .imports
                    .iter()
                    .any(|dep| resolve_dependency(&names, dep).contains(&module.module.as_str()))
            })
            .map(|other| other.module.clone())
            .collect();

        let base = CodeMeta {
            run,
            unit: module.module.clone(),
            module: module.module.clone(),
            path: module.path.clone(),
            kind: CodeUnitKind::Module,
            line: 0,
            signature: None,
            docstring: module.docstring.clone(),
            bases: Vec::new(),
            parent: None,
            dependencies: module.imports.clone(),
            dependents,
        };
        fragments.push(unit(&module.path, &module.module, module_text(module), base.clone(), at));

        let member = |unit_id: String, kind: CodeUnitKind| CodeMeta {
            unit: unit_id,
            kind,
            docstring: None,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            ..base.clone()
        };

        for class in &module.classes {
            let mut meta = member(format!("{}::CLASS::{}", module.module, class.name), CodeUnitKind::Class);
            meta.line = class.line;
            meta.signature = Some(class_header(&class.name, &class.bases));
            meta.docstring = class.docstring.clone();
            meta.bases = class.bases.clone();
            let mut text = class_header(&class.name, &class.bases);
            if let Some(doc) = &class.docstring {
                text.push_str(&format!("\n{doc}"));
            }
            for method in &class.methods {
                text.push_str(&format!("\n    {}", method.signature));
            }
            fragments.push(unit(&module.path, &class.name, text, meta, at));

            for method in &class.methods {
                let mut meta = member(
                    format!("{}::METHOD::{}.{}", module.module, class.name, method.name),
                    CodeUnitKind::Method,
                );
                meta.parent = Some(class.name.clone());
                fill_function(&mut meta, method);
                let qualified = format!("{}.{}", class.name, method.name);
                fragments.push(unit(&module.path, &qualified, method.source.clone(), meta, at));
            }
        }

        for function in &module.functions {
            let mut meta = member(
                format!("{}::FUNC::{}", module.module, function.name),
                CodeUnitKind::Function,
            );
            fill_function(&mut meta, function);
            fragments.push(unit(&module.path, &function.name, function.source.clone(), meta, at));
        }
    }

    fragments
}

fn unit(path: &str, name: &str, text: String, meta: CodeMeta, at: DateTime<Utc>) -> Fragment {
    let locator = if meta.kind == CodeUnitKind::Module {
        path.to_string()
    } else {
        format!("{path}:{name}")
    };
    Fragment::new(MemoryClass::CodeUnit, locator, text)
        .with_code(meta)
        .created_at(at)
}

fn fill_function(meta: &mut CodeMeta, function: &ScannedFunction) {
    meta.line = function.line;
    meta.signature = Some(function.signature.clone());
    meta.docstring = function.docstring.clone();
}

pub(crate) fn class_header(name: &str, bases: &[String]) -> String {
    if bases.is_empty() {
        format!("class {name}")
    } else {
        format!("class {name}({})", bases.join(", "))
    }
}

fn module_text(module: &ScannedModule) -> String {
    let mut text = format!("module {} ({})", module.module, module.path);
    if let Some(doc) = &module.docstring {
        text.push_str(&format!("\n{doc}"));
    }
    if !module.imports.is_empty() {
        text.push_str(&format!("\nimports: {}", module.imports.join(", ")));
    }
    if !module.classes.is_empty() {
        let classes: Vec<&str> = module.classes.iter().map(|c| c.name.as_str()).collect();
        text.push_str(&format!("\nclasses: {}", classes.join(", ")));
    }
    if !module.functions.is_empty() {
        let functions: Vec<&str> = module.functions.iter().map(|f| f.name.as_str()).collect();
        text.push_str(&format!("\nfunctions: {}", functions.join(", ")));
    }
    text
}
