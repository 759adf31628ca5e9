// Snapshot tests: lock the printed form of expanded modules to detect
// unintended changes in the generated loops.
//
// Uses the library API (parse → resolve → ExpandPass) and snapshots the
// Display output. Snapshots are managed by `insta` and stored under
// `compiler/tests/snapshots/`.
//
// Run `cargo insta review` after intentional output changes to update baselines.

use kxc::expand::{ExpandOptions, ExpandPass};
use kxc::ir::Module;

fn expand(source: &str, options: ExpandOptions) -> Module {
    let parse_result = kxc::parser::parse(source);
    assert!(
        parse_result.errors.is_empty(),
        "parse errors: {:?}",
        parse_result.errors
    );
    let resolved = kxc::resolve::resolve(&parse_result.module.unwrap());
    assert!(
        resolved.diagnostics.is_empty(),
        "resolve diagnostics: {:#?}",
        resolved.diagnostics
    );
    let mut module = resolved.module;
    ExpandPass::new(options)
        .run(&mut module)
        .unwrap_or_else(|e| panic!("expansion failed: {}", e));
    module
}

#[test]
fn value_kernel_module() {
    let module = expand(
        "\
export foreach @twice 0x23

define i32 @twice(i32 %in) {
entry:
  %r = mul i32 %in, 2
  ret i32 %r
}
",
        ExpandOptions::default(),
    );
    insta::assert_snapshot!("value_kernel_module", module.to_string());
}

#[test]
fn legacy_kernel_dynamic_steps() {
    let module = expand(
        "\
export foreach @root 0x0b

define void @root(i32* %in, i32* %out, i32 %x) {
entry:
  %v = load i32, i32* %in
  %r = add i32 %v, %x
  store i32 %r, i32* %out
  ret void
}
",
        ExpandOptions {
            static_steps: false,
            ..ExpandOptions::default()
        },
    );
    let expanded = module.function("root.expand").unwrap();
    insta::assert_snapshot!("legacy_kernel_dynamic_steps", expanded.to_string());
}
