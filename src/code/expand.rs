//! Dependency-graph context expansion and the skeleton view.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::index::IndexGeneration;
use crate::memory::types::{CodeMeta, CodeUnitKind, FragmentId, MemoryClass};
use crate::retrieval::orchestrator::SearchHit;

use super::class_header;

#[derive(Debug, Clone, Serialize)]
pub struct ExpandedUnit {
    pub fragment_id: FragmentId,
    pub unit: String,
    pub module: String,
    pub path: String,
    pub kind: CodeUnitKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Hops from the nearest seed; 0 for seeds.
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Expansion {
    pub units: Vec<ExpandedUnit>,
    pub skeleton: String,
    /// Seeds that are not live code units.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignored_seeds: Vec<FragmentId>,
}

impl Expansion {
    pub fn fragment_ids(&self) -> Vec<FragmentId> {
        self.units.iter().map(|u| u.fragment_id.clone()).collect()
    }
}

/// Walk the generation's dependency graph from `seeds`, `depth` hops in
/// both directions. Duplicates across seeds are unioned; cycles terminate.
#[tracing::instrument(skip_all, fields(seeds = seeds.len(), depth))]
pub fn expand(generation: &IndexGeneration, seeds: &[FragmentId], depth: usize) -> Expansion {
    let (known, ignored_seeds): (Vec<FragmentId>, Vec<FragmentId>) = seeds
        .iter()
        .cloned()
        .partition(|id| generation.graph.contains_fragment(id));

    let units: Vec<ExpandedUnit> = generation
        .graph
        .traverse(&known, depth)
        .into_iter()
        .filter_map(|reached| {
            let meta = generation.catalog.get(&reached.fragment)?;
            let code = meta.code.as_ref()?;
            Some(ExpandedUnit {
                fragment_id: reached.fragment,
                unit: reached.unit,
                module: code.module.clone(),
                path: code.path.clone(),
                kind: code.kind,
                signature: code.signature.clone(),
                depth: reached.depth,
            })
        })
        .collect();

    if !ignored_seeds.is_empty() {
        tracing::debug!(ignored = ignored_seeds.len(), "seeds without a code unit skipped");
    }

    let skeleton = skeleton(generation, &units);
    Expansion {
        units,
        skeleton,
        ignored_seeds,
    }
}

/// Expand the code-unit hits of a search. `None` when no hit is code.
pub fn expand_hits(generation: &IndexGeneration, hits: &[SearchHit], depth: usize) -> Option<Expansion> {
    let seeds: Vec<FragmentId> = hits
        .iter()
        .filter(|h| h.memory_class == MemoryClass::CodeUnit)
        .map(|h| h.fragment_id.clone())
        .collect();
    if seeds.is_empty() {
        return None;
    }
    Some(expand(generation, &seeds, depth))
}

/// Condensed module → class → signature tree of an expanded set.
///
/// A module reached as a whole shows all of its members; otherwise only
/// the reached members (and the classes owning reached methods) appear.
pub fn skeleton(generation: &IndexGeneration, units: &[ExpandedUnit]) -> String {
    let mut touched: BTreeMap<&str, (bool, HashSet<&str>)> = BTreeMap::new();
    for unit in units {
        let entry = touched.entry(unit.module.as_str()).or_default();
        if unit.kind == CodeUnitKind::Module {
            entry.0 = true;
        }
        entry.1.insert(unit.unit.as_str());
    }
    if touched.is_empty() {
        return String::new();
    }

    let mut members: BTreeMap<&str, Vec<&CodeMeta>> = BTreeMap::new();
    for code in generation.catalog.values().filter_map(|m| m.code.as_ref()) {
        if touched.contains_key(code.module.as_str()) {
            members.entry(code.module.as_str()).or_default().push(code);
        }
    }

    let mut lines = Vec::new();
    for (module, (whole, reached)) in &touched {
        let mut units = members.remove(module).unwrap_or_default();
        units.sort_by(|a, b| a.line.cmp(&b.line).then_with(|| a.unit.cmp(&b.unit)));

        let path = units
            .iter()
            .find(|u| u.kind == CodeUnitKind::Module)
            .map(|u| u.path.as_str())
            .or_else(|| units.first().map(|u| u.path.as_str()))
            .unwrap_or("");
        let module_doc = units
            .iter()
            .find(|u| u.kind == CodeUnitKind::Module)
            .and_then(|u| u.docstring.as_deref());
        lines.push(with_doc(format!("MODULE : {module} ({path})"), module_doc));

        let reached_parents: HashSet<&str> = units
            .iter()
            .filter(|u| u.kind == CodeUnitKind::Method && reached.contains(u.unit.as_str()))
            .filter_map(|u| u.parent.as_deref())
            .collect();

        for class in units.iter().filter(|u| u.kind == CodeUnitKind::Class) {
            let class_name = class.unit.rsplit("::").next().unwrap_or(&class.unit);
            let class_reached = reached.contains(class.unit.as_str());
            if !(*whole || class_reached || reached_parents.contains(class_name)) {
                continue;
            }
            lines.push(with_doc(
                format!("  └── {}", class_header(class_name, &class.bases)),
                class.docstring.as_deref(),
            ));
            for method in units
                .iter()
                .filter(|u| u.kind == CodeUnitKind::Method && u.parent.as_deref() == Some(class_name))
            {
                if *whole || class_reached || reached.contains(method.unit.as_str()) {
                    lines.push(with_doc(
                        format!("      └── {}", signature_of(method)),
                        method.docstring.as_deref(),
                    ));
                }
            }
        }

        for function in units.iter().filter(|u| u.kind == CodeUnitKind::Function) {
            if *whole || reached.contains(function.unit.as_str()) {
                lines.push(with_doc(
                    format!("  └── {}", signature_of(function)),
                    function.docstring.as_deref(),
                ));
            }
        }
        lines.push(String::new());
    }

    lines.join("\n").trim_end().to_string()
}

fn signature_of(meta: &CodeMeta) -> String {
    match &meta.signature {
        Some(sig) => sig.clone(),
        None => format!("def {}(...)", meta.unit.rsplit(['.', ':']).next().unwrap_or("")),
    }
}

fn with_doc(line: String, doc: Option<&str>) -> String {
    match doc {
        Some(doc) => format!("{line}  # {doc}"),
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::scanner::parse_module;
    use crate::code::unit_fragments;
    use crate::index::keyword::KeywordIndex;
    use crate::index::{FragmentMeta, Liveness};
    use crate::memory::types::Fragment;
    use crate::store::offsets::{OffsetEntry, OffsetTable};
    use crate::store::vectors::VectorIndex;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn generation(tmp: &TempDir, fragments: &[Fragment]) -> IndexGeneration {
        let mut offsets = OffsetTable::default();
        let mut vectors = VectorIndex::new(2);
        for (i, f) in fragments.iter().enumerate() {
            offsets.insert(f.id.clone(), OffsetEntry { offset: i as u64, length: 1 });
            vectors.insert(f.id.clone(), vec![1.0, 0.0]).unwrap();
        }
        let mut liveness = Liveness::default();
        let metas: Vec<FragmentMeta> = fragments.iter().map(FragmentMeta::from).collect();
        liveness.observe(&metas);
        IndexGeneration::assemble(
            1,
            offsets,
            vectors,
            metas,
            Arc::new(KeywordIndex::open(tmp.path().join("kw.db")).unwrap()),
            liveness,
            None,
        )
    }

    fn find<'a>(fragments: &'a [Fragment], unit: &str) -> &'a Fragment {
        fragments
            .iter()
            .find(|f| f.code.as_ref().is_some_and(|c| c.unit == unit))
            .unwrap()
    }

    #[test]
    fn test_mutual_imports_depth_one_returns_both() {
        let tmp = TempDir::new().unwrap();
        let modules = vec![
            parse_module("a", "a.py", "import b\n"),
            parse_module("b", "b.py", "import a\n"),
        ];
        let fragments = unit_fragments(&modules, 1, Utc::now());
        let g = generation(&tmp, &fragments);

        let expansion = expand(&g, &[find(&fragments, "a").id.clone()], 1);
        let units: HashSet<&str> = expansion.units.iter().map(|u| u.unit.as_str()).collect();
        assert_eq!(units, HashSet::from(["a", "b"]));
        assert_eq!(expansion.units.len(), 2);
    }

    #[test]
    fn test_skeleton_shows_structure_without_bodies() {
        let tmp = TempDir::new().unwrap();
        let modules = vec![parse_module(
            "app.agent",
            "app/agent.py",
            "\"\"\"Agent loop.\"\"\"\n\nclass Agent(Base):\n    \"\"\"Runs.\"\"\"\n    def run(self, q):\n        \"\"\"Answer.\"\"\"\n        return secret_body()\n\ndef helper(x):\n    return x\n",
        )];
        let fragments = unit_fragments(&modules, 1, Utc::now());
        let g = generation(&tmp, &fragments);

        let expansion = expand(&g, &[find(&fragments, "app.agent").id.clone()], 0);
        assert_eq!(
            expansion.skeleton,
            "MODULE : app.agent (app/agent.py)  # Agent loop.\n\
             \x20 └── class Agent(Base)  # Runs.\n\
             \x20     └── def run(self, q)  # Answer.\n\
             \x20 └── def helper(x)"
        );
        assert!(!expansion.skeleton.contains("secret_body"));
    }

    #[test]
    fn test_partial_module_shows_only_reached_members() {
        let tmp = TempDir::new().unwrap();
        let modules = vec![parse_module(
            "m",
            "m.py",
            "class A:\n    def one(self):\n        pass\n    def two(self):\n        pass\n\ndef f():\n    pass\n",
        )];
        let fragments = unit_fragments(&modules, 1, Utc::now());
        let g = generation(&tmp, &fragments);

        let expansion = expand(&g, &[find(&fragments, "m::METHOD::A.two").id.clone()], 0);
        assert_eq!(
            expansion.skeleton,
            "MODULE : m (m.py)\n  └── class A\n      └── def two(self)"
        );
    }

    #[test]
    fn test_non_code_seeds_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let doc = Fragment::new(MemoryClass::Document, "d.md", "text");
        let g = generation(&tmp, &[doc.clone()]);
        let expansion = expand(&g, &[doc.id.clone()], 2);
        assert!(expansion.units.is_empty());
        assert_eq!(expansion.ignored_seeds, vec![doc.id]);
        assert!(expansion.skeleton.is_empty());
    }

    #[test]
    fn test_expand_hits_uses_code_hits_only() {
        let tmp = TempDir::new().unwrap();
        let modules = vec![
            parse_module("a", "a.py", "import b\n"),
            parse_module("b", "b.py", ""),
        ];
        let fragments = unit_fragments(&modules, 1, Utc::now());
        let g = generation(&tmp, &fragments);
        let hit = |f: &Fragment| SearchHit {
            fragment_id: f.id.clone(),
            score: 1.0,
            source_locator: f.locator.clone(),
            memory_class: f.class,
            similarity: None,
            preview: String::new(),
            created_at: f.created_at,
        };
        let doc = Fragment::new(MemoryClass::Document, "d.md", "x");

        assert!(expand_hits(&g, &[hit(&doc)], 1).is_none());
        let expansion = expand_hits(&g, &[hit(&doc), hit(find(&fragments, "b"))], 1).unwrap();
        assert_eq!(expansion.units.len(), 2);
    }
}
