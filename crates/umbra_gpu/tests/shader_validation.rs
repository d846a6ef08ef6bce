//! Every built-in shader parses and validates with naga

use naga::valid::{Capabilities, ValidationFlags, Validator};
use umbra_gpu::ShaderSources;
use umbra_render::PassId;

fn validate(label: &str, source: &str) -> Result<(), String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| format!("{}: {}", label, e.emit_to_string(source)))?;
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| format!("{}: {:?}", label, e))?;
    Ok(())
}

#[test]
fn test_pass_shaders_validate() {
    let sources = ShaderSources::builtin();
    for pass in PassId::ALL {
        if let Err(e) = validate(pass.label(), &sources.pass(pass)) {
            panic!("{}", e);
        }
    }
}

#[test]
fn test_clear_heads_validates() {
    let sources = ShaderSources::builtin();
    validate("clear_heads", &sources.clear_heads()).unwrap();
}

#[test]
fn test_entry_points_present() {
    let sources = ShaderSources::builtin();
    for pass in PassId::ALL {
        let module = naga::front::wgsl::parse_str(&sources.pass(pass)).unwrap();
        let names: Vec<&str> = module.entry_points.iter().map(|e| e.name.as_str()).collect();
        if pass == PassId::ListBufferGeneration {
            assert_eq!(names, ["cs_main"]);
        } else {
            assert!(names.contains(&"vs_main") && names.contains(&"fs_main"), "{}: {:?}", pass, names);
        }
    }
}

#[test]
fn test_broken_override_is_rejected() {
    let mut sources = ShaderSources::builtin();
    sources.set_pass(PassId::RenderScene, "fn fs_main( {");
    assert!(validate("broken", &sources.pass(PassId::RenderScene)).is_err());
}
