use std::collections::HashMap;
use std::mem::{offset_of, size_of};

use fluid_backdrop::gpu::PassUniforms;
use fluid_backdrop::programs::Stage;
use fluid_backdrop::shaders;

fn parse(label: &str, source: &str) -> naga::Module {
    naga::front::wgsl::parse_str(source)
        .unwrap_or_else(|e| panic!("Failed to parse {label}:\n{}", e.emit_to_string(source)))
}

fn validate(label: &str, source: &str, errors: &mut Vec<String>) {
    let module = match naga::front::wgsl::parse_str(source) {
        Ok(module) => module,
        Err(e) => {
            errors.push(format!("Failed to parse {label}:\n{}", e.emit_to_string(source)));
            return;
        }
    };

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );

    if let Err(e) = validator.validate(&module) {
        errors.push(format!("Failed to validate {label}:\n{e:?}"));
    }
}

#[test]
fn validate_all_stages() {
    let mut errors = Vec::new();
    validate("vertex", shaders::VERTEX, &mut errors);
    for stage in Stage::ALL {
        validate(stage.label(), &shaders::fragment_source(stage), &mut errors);
    }

    if !errors.is_empty() {
        panic!("Shader validation failed:\n{}", errors.join("\n"));
    }
}

#[test]
fn every_stage_exposes_its_entry_point() {
    let vertex = parse("vertex", shaders::VERTEX);
    assert!(vertex
        .entry_points
        .iter()
        .any(|e| e.name == "vs_main" && e.stage == naga::ShaderStage::Vertex));

    for stage in Stage::ALL {
        let module = parse(stage.label(), &shaders::fragment_source(stage));
        assert!(
            module
                .entry_points
                .iter()
                .any(|e| e.name == "fs_main" && e.stage == naga::ShaderStage::Fragment),
            "{stage} has no fs_main"
        );
    }
}

#[test]
fn pass_uniforms_layout_matches_wgsl() {
    let source = shaders::fragment_source(Stage::Splat);
    let module = parse("splat", &source);

    let mut layouter = naga::proc::Layouter::default();
    let gctx = naga::proc::GlobalCtx {
        types: &module.types,
        constants: &module.constants,
        overrides: &module.overrides,
        global_expressions: &module.global_expressions,
    };
    layouter
        .update(gctx)
        .unwrap_or_else(|e| panic!("Failed to compute layout: {e}"));

    let (handle, ty) = module
        .types
        .iter()
        .find(|(_, ty)| ty.name.as_deref() == Some("PassUniforms"))
        .expect("PassUniforms not found");
    let members = match &ty.inner {
        naga::TypeInner::Struct { members, .. } => members,
        _ => panic!("PassUniforms is not a struct"),
    };
    let offsets: HashMap<String, u32> = members
        .iter()
        .filter_map(|m| m.name.clone().map(|name| (name, m.offset)))
        .collect();

    assert_eq!(layouter[handle].size as usize, size_of::<PassUniforms>());
    let expected = [
        ("texel_size", offset_of!(PassUniforms, texel_size)),
        ("point", offset_of!(PassUniforms, point)),
        ("aspect_ratio", offset_of!(PassUniforms, aspect_ratio)),
        ("radius", offset_of!(PassUniforms, radius)),
        ("dt", offset_of!(PassUniforms, dt)),
        ("dissipation", offset_of!(PassUniforms, dissipation)),
        ("color", offset_of!(PassUniforms, color)),
        ("curl", offset_of!(PassUniforms, curl)),
        ("value", offset_of!(PassUniforms, value)),
        ("intensity", offset_of!(PassUniforms, intensity)),
        ("weight", offset_of!(PassUniforms, weight)),
        ("curve", offset_of!(PassUniforms, curve)),
    ];
    for (name, offset) in expected {
        assert_eq!(offsets.get(name).copied(), Some(offset as u32), "offset of {name}");
    }
}
