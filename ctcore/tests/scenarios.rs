//! End-to-end scenarios S1-S6, against the public `Engine`/`HeaderDependencyWalker`
//! surface only.

use std::fs;
use std::path::{Path, PathBuf};

use ctcore::{ContentRegistry, Engine, EngineConfig, HeaderDependencyWalker, PreprocessingCache};

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn s1_undef_propagation_cold_and_warm_cache_agree() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "defines_macro.hpp", "#define TEMP_BUFFER_SIZE 1024\n");
    write(
        dir.path(),
        "cleans_up.hpp",
        "#include \"defines_macro.hpp\"\n#undef TEMP_BUFFER_SIZE\n",
    );
    write(dir.path(), "should_be_included.hpp", "//#PKG-CONFIG=leaked-macro-pkg\nint x;\n");
    write(
        dir.path(),
        "uses_conditional.hpp",
        "#include \"cleans_up.hpp\"\n#ifndef TEMP_BUFFER_SIZE\n#include \"should_be_included.hpp\"\n#endif\n",
    );
    let main = write(dir.path(), "main.cpp", "#include \"uses_conditional.hpp\"\n");

    let config = EngineConfig::for_linux();
    let mut engine = Engine::new(config);

    let cold = engine.closure(&main).unwrap();
    assert_eq!(cold.files.len(), 4);
    assert!(cold.magic_flags.iter().any(|m| m.value == "leaked-macro-pkg"));

    let warm = engine.closure(&main).unwrap();
    assert_eq!(warm.files.len(), cold.files.len());
    assert_eq!(warm.magic_flags.len(), cold.magic_flags.len());
    assert_eq!(warm.magic_flags[0].value, cold.magic_flags[0].value);
}

#[test]
fn s2_computed_include_resolves_macro_expanded_target() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "linux/cfg.h", "int platform_cfg;\n");
    let main = write(
        dir.path(),
        "main.cpp",
        "#define PLATFORM_HEADER \"linux/cfg.h\"\n#include PLATFORM_HEADER\n",
    );

    let mut engine = Engine::new(EngineConfig::for_linux());
    let closure = engine.closure(&main).unwrap();

    assert!(closure.files.iter().any(|f| f.ends_with("linux/cfg.h")));
}

#[test]
fn s3_conditional_flag_selection_picks_the_taken_branch_only() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(
        dir.path(),
        "main.cpp",
        "#define VER 1\n#if VER<2\n//#CXXFLAGS=-DUSE_LEGACY\n#else\n//#CXXFLAGS=-DUSE_MODERN\n#endif\n",
    );

    let mut engine = Engine::new(EngineConfig::for_linux());
    let closure = engine.closure(&main).unwrap();

    let values: Vec<&str> = closure.magic_flags.iter().map(|m| m.value.as_str()).collect();
    assert_eq!(values, vec!["-DUSE_LEGACY"]);
}

#[test]
fn s4_include_guarded_header_is_analyzed_once_via_two_parents() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "x.h", "#ifndef X_H\n#define X_H\n//#CXXFLAGS=-DX\nint x;\n#endif\n");
    write(dir.path(), "left.hpp", "#include \"x.h\"\n");
    write(dir.path(), "right.hpp", "#include \"x.h\"\n");
    let main = write(dir.path(), "main.cpp", "#include \"left.hpp\"\n#include \"right.hpp\"\n");

    let mut engine = Engine::new(EngineConfig::for_linux());
    let closure = engine.closure(&main).unwrap();

    assert_eq!(closure.files.iter().filter(|f| f.ends_with("x.h")).count(), 1);
    assert_eq!(closure.magic_flags.iter().filter(|m| m.value == "-DX").count(), 1);
}

#[test]
fn s5_implied_source_sibling_is_merged_into_the_closure() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "b.cpp", "#include \"b_impl.h\"\n");
    write(dir.path(), "b_impl.h", "int impl_detail;\n");
    write(dir.path(), "b.h", "int decl;\n");
    let main = write(dir.path(), "a.cpp", "#include \"b.h\"\n");

    let mut engine = Engine::new(EngineConfig::for_linux());
    let closure = engine.closure(&main).unwrap();

    assert!(closure.implied_sources.iter().any(|p| p.ends_with("b.cpp")));
    assert!(closure.files.iter().any(|p| p.ends_with("b_impl.h")));
}

#[test]
fn s6_short_circuited_macro_does_not_invalidate_the_cache_entry() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(dir.path(), "main.cpp", "#if defined(A) && (B+1)\nyes\n#endif\n");

    let cache = PreprocessingCache::new();
    let config_a = EngineConfig::for_linux();
    let mut registry_a = ContentRegistry::new();
    let mut walker_a = HeaderDependencyWalker::new(&mut registry_a, &cache, &config_a);
    walker_a.closure(&main).unwrap();

    let mut config_b = EngineConfig::for_linux();
    config_b.variant.extra_defines.push(("B".to_string(), "1".to_string()));
    let mut registry_b = ContentRegistry::new();
    let mut walker_b = HeaderDependencyWalker::new(&mut registry_b, &cache, &config_b);
    walker_b.closure(&main).unwrap();

    assert_eq!(cache.len(), 1);
}
