//! Backend tests: IR text in, 8080 assembly out.

use c6t::codegen::{generate, Scheme};

fn asm(ir: &str) -> String {
    let scheme = Scheme::default_8080();
    generate(ir, &scheme).expect("codegen failed")
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
fn constant_return() {
    let out = asm("\tcon 3\n\tret\n");
    ordered(&out, &["lxi h,3", "jmp cret"]);
}

#[test]
fn framed_functions_get_a_prologue() {
    let out = asm("_f:\tuseregs 1\n\t.func 4,2\n\tretnull\n");
    ordered(
        &out,
        &[
            "_f:",
            "push b",
            "lhld reg0",
            "push h",
            "lhld reg1",
            "lhld reg2",
            "lxi h,0",
            "dad sp",
            "mov c,l",
            "mov b,h",
            "lxi h,-4",
            "sphl",
            "jmp cretf",
        ],
    );
}

#[test]
fn frameless_functions_do_not() {
    let out = asm("_main:\tuseregs 0\n\t.func 0,0\n\tcon 3\n\tret\n");
    assert!(!out.contains("push b"), "{}", out);
    ordered(&out, &["_main:", "lxi h,3", "jmp cret"]);
}

#[test]
fn binary_add_uses_both_pairs() {
    let out = asm("\textern _b\n\tload\n\textern _c\n\tload\n\tadd\n\teval\n");
    // extload into HL, the other side into DE, then dad.
    ordered(&out, &["lhld _b", "lda _c", "mov e,a", "lda _c+1", "mov d,a", "dad d"]);
}

#[test]
fn stores_through_extern_fold() {
    let out = asm("\textern _a\n\tcon 5\n\tstore\n\teval\n");
    ordered(&out, &["lxi h,5", "shld _a"]);
}

#[test]
fn increment_templates_absorb_small_constants() {
    let out = asm("\tauto -2\n\tload\n\tcon 1\n\tadd\n\teval\n");
    ordered(&out, &["lxi h,-2", "dad b", "inx h"]);
    assert!(!out.contains("dad d"), "{}", out);
}

#[test]
fn subtraction_of_constants_becomes_addition() {
    let out = asm("\tauto -2\n\tload\n\tcon 1\n\tsub\n\teval\n");
    // sub x,1 rewrites to add x,-1 and matches the dcx template.
    ordered(&out, &["dcx h"]);
}

#[test]
fn spills_when_both_sides_are_binary() {
    let ir = "\tauto -2\n\tload\n\tauto -4\n\tload\n\tadd\n\
              \tauto -6\n\tload\n\tauto -8\n\tload\n\tadd\n\
              \tmult\n\teval\n";
    let out = asm(ir);
    ordered(&out, &["push h", "pop d", "call cmult"]);
}

#[test]
fn compound_assignment_expands() {
    let out = asm("\textern _x\n\tcon 3\n\tasnadd\n\teval\n");
    // load x, add 3, store back.
    ordered(&out, &["lhld _x", "lxi d,3", "dad d", "shld _x"]);
}

#[test]
fn equality_goes_through_log_of_sub() {
    let out = asm("\textern _a\n\tload\n\tcon 5\n\tequ\n\teval\n");
    // a == 5 is lognot(a - 5): subtract then materialise on zero.
    ordered(&out, &["lhld _a", "lxi d,", "mov a,l", "ora h", "jz LL"]);
}

#[test]
fn branch_commands_test_and_jump() {
    let out = asm("\textern _a\n\tload\n\tbrz L5\n");
    ordered(&out, &["lhld _a", "mov a,l", "ora h", "jz L5"]);
}

#[test]
fn short_circuit_and() {
    let out = asm("\textern _a\n\tload\n\textern _b\n\tload\n\tlogand\n\tbrz L9\n");
    // a tested first; a zero skips b entirely.
    ordered(
        &out,
        &["lhld _a", "jz LL1", "lhld _b", "LL1:", "mov a,l", "ora h", "jz L9"],
    );
}

#[test]
fn conditional_evaluates_one_branch() {
    let out = asm("\textern _c\n\tload\n\tcon 1\n\tcon 2\n\tcond\n\tret\n");
    ordered(
        &out,
        &["lhld _c", "jz LL1", "lxi h,1", "jmp LL2", "LL1:", "lxi h,2", "LL2:", "jmp cret"],
    );
}

#[test]
fn calls_push_arguments_right_to_left() {
    let ir = "\tcon 1\n\tcon 2\n\textern _f\n\tcall 2\n\teval\n";
    let out = asm(ir);
    ordered(
        &out,
        &[
            "lxi h,2",
            "push h",
            "lxi h,1",
            "push h",
            "call _f",
            "xchg",
            "lxi h,4",
            "dad sp",
            "sphl",
            "xchg",
        ],
    );
}

#[test]
fn indirect_calls_go_through_the_helper() {
    let out = asm("\tauto -2\n\tload\n\tcall 0\n\teval\n");
    ordered(&out, &["lxi h,-2", "dad b", "call ccall"]);
}

#[test]
fn signed_and_unsigned_compares() {
    let signed = asm("\tcon 1\n\tcon 2\n\tless\n\teval\n");
    ordered(&signed, &["call ccmp", "jm LL"]);
    let unsigned = asm("\tcon 1\n\tcon 2\n\tuless\n\teval\n");
    ordered(&unsigned, &["call ccmp", "jc LL"]);
}

#[test]
fn register_variables_are_extern_cells() {
    let out = asm("\tregister 1\n\tload\n\teval\n");
    ordered(&out, &["lhld reg1"]);
}

#[test]
fn doswitch_dispatch() {
    let ir = "\textern _c\n\tload\n\textern L4\n\tcon 2\n\textern L7\n\tdoswitch\n";
    let out = asm(ir);
    ordered(
        &out,
        &[
            "lhld _c",
            "lxi d,L7",
            "push d",
            "lxi d,2",
            "push d",
            "lxi d,L4",
            "push d",
            "jmp cswitch",
        ],
    );
}

#[test]
fn segments_route_output() {
    let ir = "\t.data\nD1:\t.dc 1,2\n\t.text\n\tjmp L1\n\t.common _x,2\n";
    let out = asm(ir);
    // Output concatenates .text, .data, .string, .bss in order.
    ordered(&out, &[".text", "jmp L1", ".data", "D1:", ".byte 1,2", ".bss", ".common _x,2"]);
}

#[test]
fn float_helpers() {
    let out = asm("\tcon 1\n\ttoflt\n\tfret\n");
    ordered(&out, &["lxi h,1", "call cflt", "jmp cret"]);
}

#[test]
fn bad_ir_is_an_error() {
    let scheme = Scheme::default_8080();
    assert!(generate("\tadd\n", &scheme).is_err());
    assert!(generate("\tfrobnicate 1\n", &scheme).is_err());
    assert!(generate("\tcon 1\n\tcon 2\n\tbogusnode\n", &scheme).is_err());
}
