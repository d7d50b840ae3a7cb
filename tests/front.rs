//! Front-end tests: source text in, IR text out.

use c6t::parse::compile;

fn ir(source: &str) -> String {
    let result = compile(source);
    assert!(
        result.diags.is_empty(),
        "unexpected diagnostics: {:?}",
        result.diags.iter().collect::<Vec<_>>()
    );
    result.ir
}

fn ordered(haystack: &str, needles: &[&str]) {
    let mut from = 0;
    for needle in needles {
        match haystack[from..].find(needle) {
            Some(at) => from += at + needle.len(),
            None => panic!("{:?} not found in order in:\n{}", needle, haystack),
        }
    }
}

#[test]
fn file_scope_int_is_common() {
    let out = ir("int x;\n");
    assert!(out.contains(".common _x,2"), "{}", out);
}

#[test]
fn char_array_sizes() {
    let out = ir("char buf[10];\n");
    assert!(out.contains(".common _buf,10"), "{}", out);
}

#[test]
fn initialised_char_array() {
    let out = ir("char s[] \"hi\";\n");
    ordered(
        &out,
        &[".data", "_s:", ".export _s", ".dc 104", ".dc 105", ".dc 0"],
    );
}

#[test]
fn initialised_words_and_addresses() {
    let out = ir("int x 5;\nint p &x;\n");
    ordered(&out, &["_x:", ".dw 5", "_p:", ".dw _x"]);
}

#[test]
fn unsized_array_takes_initialiser_count() {
    let out = ir("int a[] {1,2,3};\n");
    ordered(&out, &["_a:", ".dw 1", ".dw 2", ".dw 3"]);
    // No padding line follows a fully initialised array.
    assert!(!out.contains(".ds"), "{}", out);
}

#[test]
fn static_data_reserves_bss() {
    let out = ir("static z[4];\n");
    ordered(&out, &[".bss", ".ds 8"]);
    assert!(!out.contains(".common"), "{}", out);
}

#[test]
fn simple_function_ir() {
    let out = ir("main() {\nreturn(1+2);\n}\n");
    ordered(
        &out,
        &[
            ".text",
            "_main:",
            ".export _main",
            "useregs 0",
            ".func 0,0",
            "con 3",
            "ret",
            "retnull",
        ],
    );
}

#[test]
fn assignment_tree_order() {
    let src = "int a, b, c, d;\nmain() {\na = b + c*d;\n}\n";
    let out = ir(src);
    ordered(
        &out,
        &[
            "extern _a",
            "extern _b",
            "load",
            "extern _c",
            "load",
            "extern _d",
            "load",
            "mult",
            "add",
            "store",
            "eval",
        ],
    );
}

#[test]
fn relational_signedness_follows_types() {
    let signed = ir("int x, y;\nmain() {\nif (x < y) x++; else y--;\n}\n");
    assert!(signed.contains("less"), "{}", signed);
    assert!(!signed.contains("uless"), "{}", signed);
    ordered(&signed, &["brz L", "jmp L"]);

    let unsigned = ir("int *x, *y;\nmain() {\nif (x < y) ;\n}\n");
    assert!(unsigned.contains("uless"), "{}", unsigned);
}

#[test]
fn pointer_arithmetic_scales() {
    let out = ir("int *p;\nmain() {\np = p + 3;\n}\n");
    // 3 scaled by sizeof(int) folds to 6.
    assert!(out.contains("con 6"), "{}", out);
}

#[test]
fn increments_carry_pointee_size() {
    let out = ir("int *p;\nmain() {\np++;\n}\n");
    ordered(&out, &["extern _p", "con 2", "postinc"]);
}

#[test]
fn char_access_uses_cload() {
    let out = ir("char c;\nint i;\nmain() {\ni = c;\n}\n");
    ordered(&out, &["extern _c", "cload", "store"]);
}

#[test]
fn locals_and_params_take_frame_offsets() {
    let out = ir("f(a, b) {\nint x;\nx = a + b;\n}\n");
    // Params at 10 and 12; the local below the frame pointer.
    ordered(&out, &["useregs 0", ".func 2,4", "auto -2", "auto 10", "load", "auto 12"]);
}

#[test]
fn register_locals_number_upwards() {
    let out = ir("f() {\nregister r, s;\nr = 1;\ns = 2;\n}\n");
    ordered(&out, &["useregs 2", "register 0", "register 1"]);
}

#[test]
fn struct_members_are_flat_offsets() {
    let src = "struct point { int px; int py; };\n\
               struct point origin;\n\
               main() {\norigin.py = 3;\n}\n";
    let out = ir(src);
    // The member offset rides an add of 2 onto the struct address.
    ordered(&out, &["extern _origin", "con 2", "add", "con 3", "store"]);
    assert!(out.contains(".common _origin,4"), "{}", out);
}

#[test]
fn self_referential_struct() {
    let src = "struct node { struct node *next; int v; };\nstruct node n;\n";
    let out = ir(src);
    assert!(out.contains(".common _n,4"), "{}", out);
}

#[test]
fn switch_emits_case_table() {
    let src = "main(c) {\nswitch (c) {\ncase 1: return(1);\ncase 2: return(2);\ndefault: return(0);\n}\n}\n";
    let out = ir(src);
    ordered(&out, &[".data", ".dw 1,", ".dw 2,", ".text", "doswitch"]);
}

#[test]
fn string_pool_flushes_at_end() {
    let out = ir("f() {\nputs(\"hi\");\n}\n");
    // The call references the pool label; the pool flushes under
    // .string after the code.
    ordered(&out, &["call 1", ".string", ".dc 104,105,0"]);
    assert!(out.contains("extern _puts"), "{}", out);
}

#[test]
fn goto_labels_define_and_jump() {
    let out = ir("f() {\nhere:\ngoto here;\n}\n");
    ordered(&out, &["extern L", "ijmp"]);
}

#[test]
fn break_outside_loop_is_diagnosed() {
    let result = compile("f() {\nbreak;\n}\n");
    assert_eq!(result.diags.count(), 1);
    let diag = result.diags.iter().next().unwrap();
    assert_eq!(format!("{}", diag), "2: nothing to break to");
}

#[test]
fn duplicate_case_is_diagnosed() {
    let result = compile("f(c) {\nswitch (c) {\ncase 1: ;\ncase 1: ;\n}\n}\n");
    assert_eq!(result.diags.count(), 1);
    assert!(format!("{}", result.diags.iter().next().unwrap()).contains("redefined case"));
}

#[test]
fn undefined_goto_label_is_diagnosed() {
    let result = compile("f() {\ngoto nowhere;\n}\n");
    assert_eq!(result.diags.count(), 1);
    assert!(
        format!("{}", result.diags.iter().next().unwrap()).contains("undefined label nowhere")
    );
}

#[test]
fn float_return_converts() {
    let out = ir("float f() {\nreturn(1);\n}\n");
    ordered(&out, &["con 1", "toflt", "fret"]);
}

#[test]
fn preprocessor_feeds_the_parser() {
    let (cooked, diags) = c6t::preproc::preprocess("#define SIZE 4\nint a[SIZE];\n");
    assert!(diags.is_empty());
    let out = ir(&cooked);
    assert!(out.contains(".common _a,8"), "{}", out);
}
