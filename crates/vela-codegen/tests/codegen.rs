//! Statement and expression lowering fixtures: build a typed tree, compile,
//! decode, and check the emitted opcode stream.

mod common;

use common::{has_run, op_list, B};
use vela_analysis::Type;
use vela_codegen::{compile, CodegenError};
use vela_syntax::{AssignOp, BinaryOp};
use vela_vm::Opcode::*;

fn compile_main(b: B, main: vela_syntax::Decl) -> Vec<u8> {
    let program = b.program(vec![B::file(vec![main])]);
    let (bytes, _) = compile(&program).expect("compile");
    bytes
}

#[test]
fn simple_return() {
    let mut b = B::new();
    let v = b.int(42);
    let ret = b.ret(vec![v]);
    let main = b.main_fn(vec![ret]);
    let bytes = compile_main(b, main);
    assert_eq!(op_list(&bytes), vec![PushInt8, Ret]);
}

#[test]
fn unfolded_arithmetic() {
    let mut b = B::new();
    let (one, two) = (b.int(1), b.int(2));
    let sum = b.bin(one, BinaryOp::Add, two);
    let def = b.define("x", sum);
    let x = b.ident("x");
    let ret = b.ret(vec![x]);
    let main = b.main_fn(vec![def, ret]);
    let bytes = compile_main(b, main);
    assert_eq!(
        op_list(&bytes),
        vec![InitSlot, Push1, Push2, Add, StLoc0, LdLoc0, Ret]
    );
}

#[test]
fn fused_comparison_jump() {
    // if x > 5 { return 1 }; return 0 -- the comparison becomes one
    // negated jump-compare, shortened.
    let mut b = B::new();
    let x = b.ident("x");
    let five = b.int(5);
    let cond = b.bin(x, BinaryOp::Gt, five);
    let one = b.int(1);
    let ret1 = b.ret(vec![one]);
    let ifs = b.if_stmt(cond, vec![ret1], None);
    let zero = b.int(0);
    let ret0 = b.ret(vec![zero]);
    let param = b.param("x", Type::Int);
    let result = b.result(Type::Int);
    let main = b.func("Main", vec![param], vec![result], vec![ifs, ret0]);
    let bytes = compile_main(b, main);
    assert_eq!(
        op_list(&bytes),
        vec![InitSlot, LdArg0, Push5, JmpLe, Push1, Ret, Push0, Ret]
    );
}

#[test]
fn slice_constant_index() {
    // a := []int{0,0}; a[1] = 42; return a[1] + 0
    let mut b = B::new();
    let (z0, z1) = (b.int(0), b.int(0));
    let lit = b.lit_of(B::int_slice(), vec![z0, z1]);
    let def = b.define("a", lit);

    let a1 = b.ident("a");
    let i1 = b.int(1);
    let target = b.index(a1, i1);
    let v = b.int(42);
    let store = b.assign(target, v);

    let a2 = b.ident("a");
    let i2 = b.int(1);
    let load = b.index(a2, i2);
    let z = b.int(0);
    let sum = b.bin(load, BinaryOp::Add, z);
    let ret = b.ret(vec![sum]);

    let main = b.main_fn(vec![def, store, ret]);
    let bytes = compile_main(b, main);
    assert_eq!(
        op_list(&bytes),
        vec![
            InitSlot, Push0, Push0, Push2, Pack, StLoc0, // literal
            PushInt8, LdLoc0, Push1, Rot, SetItem, // a[1] = 42
            LdLoc0, Push1, PickItem, Push0, Add, Ret, // return a[1] + 0
        ]
    );
}

#[test]
fn byte_slice_literal_and_subslice() {
    // a := []byte{0,1,2,3}; b := a[1:3]; return b
    let mut b = B::new();
    let elems = vec![b.int(0), b.int(1), b.int(2), b.int(3)];
    let lit = b.lit_of(B::byte_slice(), elems);
    let def_a = b.define("a", lit);

    let a = b.ident("a");
    let (lo, hi) = (b.int(1), b.int(3));
    let sub = b.slice_expr(a, Some(lo), Some(hi));
    let def_b = b.define("b", sub);

    let bv = b.ident("b");
    let ret = b.ret(vec![bv]);

    let result = b.result(B::byte_slice());
    let main = b.func("Main", vec![], vec![result], vec![def_a, def_b, ret]);
    let bytes = compile_main(b, main);
    assert_eq!(
        op_list(&bytes),
        vec![
            InitSlot, PushData1, Convert, StLoc0, // bytes literal into buffer
            LdLoc0, Push1, Push3, Over, Sub, SubStr, StLoc1, // a[1:3]
            LdLoc1, Ret,
        ]
    );
    // the literal's payload rides in the PushData operand
    assert_eq!(bytes[4], 4);
    assert_eq!(&bytes[5..9], &[0, 1, 2, 3]);
}

#[test]
fn subslice_with_constant_bounds() {
    // const x = 1; const y = 3; b := a[x:y] compiles exactly like literal
    // bounds once the resolver has folded the references.
    let mut b = B::new();
    let elems = vec![b.int(0), b.int(1), b.int(2), b.int(3)];
    let lit = b.lit_of(B::byte_slice(), elems);
    let def_a = b.define("a", lit);
    let a = b.ident("a");
    let (lo, hi) = (b.const_int("x", 1), b.const_int("y", 3));
    let sub = b.slice_expr(a, Some(lo), Some(hi));
    let def_b = b.define("b", sub);
    let bv = b.ident("b");
    let ret = b.ret(vec![bv]);
    let result = b.result(B::byte_slice());
    let main = b.func("Main", vec![], vec![result], vec![def_a, def_b, ret]);
    let bytes = compile_main(b, main);
    assert_eq!(
        op_list(&bytes),
        vec![
            InitSlot, PushData1, Convert, StLoc0, LdLoc0, Push1, Push3, Over, Sub, SubStr,
            StLoc1, LdLoc1, Ret,
        ]
    );
}

#[test]
fn append_to_nil_byte_slice() {
    // var a []byte; a = append(a, 1); return a
    let mut b = B::new();
    let decl = b.var_decl("a", B::byte_slice());
    let callee = b.ident("append");
    let arg0 = b.tident("a", B::byte_slice());
    let one = b.int(1);
    let call = b.call(callee, vec![arg0, one]);
    let a_lhs = b.ident("a");
    let set = b.assign(a_lhs, call);
    let a = b.ident("a");
    let ret = b.ret(vec![a]);
    let result = b.result(B::byte_slice());
    let main = b.func("Main", vec![], vec![result], vec![decl, set, ret]);
    let bytes = compile_main(b, main);
    let ops = op_list(&bytes);
    // nil slice is replaced by an empty buffer, then CAT appends
    assert!(has_run(
        &ops,
        &[Dup, IsNull, JmpIfNot, Drop, Push0, NewBuffer, Swap, Cat]
    ));
    assert!(has_run(&ops, &[PushNull, StLoc0]));
}

#[test]
fn make_map_set_get() {
    // a := make(map[int]int); a[1] = 10; return a[1]
    let mut b = B::new();
    let mk = b.make(B::int_map(), None);
    let def = b.define("a", mk);
    let a1 = b.ident("a");
    let k1 = b.int(1);
    let t = b.index(a1, k1);
    let ten = b.int(10);
    let put = b.assign(t, ten);
    let a2 = b.ident("a");
    let k2 = b.int(1);
    let get = b.index(a2, k2);
    let ret = b.ret(vec![get]);
    let main = b.main_fn(vec![def, put, ret]);
    let bytes = compile_main(b, main);
    let ops = op_list(&bytes);
    assert!(has_run(&ops, &[NewMap, StLoc0]));
    assert!(has_run(&ops, &[LdLoc0, Push1, Rot, SetItem]));
    assert!(has_run(&ops, &[LdLoc0, Push1, PickItem, Ret]));
}

#[test]
fn struct_slice_field_assign() {
    // s := []P{{1,2},{3,4}}; s[1].a = 42; return s[1].a
    let p = B::struct_of(&[("a", Type::Int), ("b", Type::Int)]);
    let mut b = B::new();
    let e1 = {
        let (one, two) = (b.int(1), b.int(2));
        b.lit_of(p.clone(), vec![one, two])
    };
    let e2 = {
        let (three, four) = (b.int(3), b.int(4));
        b.lit_of(p.clone(), vec![three, four])
    };
    let lit = b.lit_of(Type::Slice(Box::new(p.clone())), vec![e1, e2]);
    let def = b.define("s", lit);

    let s1 = b.ident("s");
    let i1 = b.int(1);
    let elem1 = b.tindex(s1, i1, p.clone());
    let target = b.selector(elem1, "a");
    let v = b.int(42);
    let set = b.assign(target, v);

    let s2 = b.ident("s");
    let i2 = b.int(1);
    let elem2 = b.tindex(s2, i2, p.clone());
    let load = b.selector(elem2, "a");
    let ret = b.ret(vec![load]);

    let main = b.main_fn(vec![def, set, ret]);
    let bytes = compile_main(b, main);
    let ops = op_list(&bytes);
    assert_eq!(ops.iter().filter(|&&o| o == NewStruct).count(), 2);
    // field store: value, struct, index, ROT, SETITEM
    assert!(has_run(&ops, &[PushInt8, LdLoc0, Push1, PickItem, Push0, Rot, SetItem]));
    assert!(has_run(&ops, &[LdLoc0, Push1, PickItem, Push0, PickItem, Ret]));
}

#[test]
fn compound_assign_on_index() {
    // a := []int{1,2,3}; a[1] += 40; return a[1]
    let mut b = B::new();
    let elems = vec![b.int(1), b.int(2), b.int(3)];
    let lit = b.lit_of(B::int_slice(), elems);
    let def = b.define("a", lit);

    let a1 = b.ident("a");
    let i1 = b.int(1);
    let lhs = b.index(a1, i1);
    let forty = b.int(40);
    let add = b.assign_op(lhs, AssignOp::Add, forty);

    let a2 = b.ident("a");
    let i2 = b.int(1);
    let load = b.index(a2, i2);
    let ret = b.ret(vec![load]);

    let main = b.main_fn(vec![def, add, ret]);
    let bytes = compile_main(b, main);
    let ops = op_list(&bytes);
    assert!(has_run(
        &ops,
        &[LdLoc0, Push1, PickItem, PushInt8, Add, LdLoc0, Push1, Rot, SetItem]
    ));
}

#[test]
fn for_loop_with_post() {
    // sum := 0; for i := 0; i < 3; i++ { sum += i }; return sum
    let mut b = B::new();
    let z = b.int(0);
    let def_sum = b.define("sum", z);
    let z2 = b.int(0);
    let init = b.define("i", z2);
    let i1 = b.ident("i");
    let three = b.int(3);
    let cond = b.bin(i1, BinaryOp::Lt, three);
    let i2 = b.ident("i");
    let post = b.inc(i2);
    let sum_lhs = b.ident("sum");
    let i3 = b.ident("i");
    let body = b.assign_op(sum_lhs, AssignOp::Add, i3);
    let loop_stmt = b.for_stmt(Some(init), Some(cond), Some(post), vec![body]);
    let sum = b.ident("sum");
    let ret = b.ret(vec![sum]);
    let main = b.main_fn(vec![def_sum, loop_stmt, ret]);
    let bytes = compile_main(b, main);
    assert_eq!(
        op_list(&bytes),
        vec![
            InitSlot, Push0, StLoc0, Push0, StLoc1, // sum, i
            LdLoc1, Push3, Lt, JmpIfNot, // condition
            LdLoc0, LdLoc1, Add, StLoc0, // body
            LdLoc1, Inc, StLoc1, // post
            Jmp, // back edge
            LdLoc0, Ret,
        ]
    );
}

#[test]
fn range_over_map_drains_four() {
    // m := make(map[int]int); for k := range m {}; return 0
    let mut b = B::new();
    let mk = b.make(B::int_map(), None);
    let def = b.define("m", mk);
    let k = b.name("k");
    let m = b.tident("m", B::int_map());
    let range = b.range_stmt(Some(k), None, m, vec![]);
    let z = b.int(0);
    let ret = b.ret(vec![z]);
    let main = b.main_fn(vec![def, range, ret]);
    let bytes = compile_main(b, main);
    let ops = op_list(&bytes);
    assert!(has_run(&ops, &[Dup, Keys, Dup, Size, Push0]));
    assert!(has_run(&ops, &[Over, Over, JmpLe]));
    // keys[i] loaded for the key binding
    assert!(has_run(&ops, &[Push2, Pick, Over, PickItem]));
    assert!(has_run(&ops, &[Inc, Jmp]));
    // four loop items leave the stack via PACK + DROP
    assert!(has_run(&ops, &[Push4, Pack, Drop]));
}

#[test]
fn return_inside_range_drains_three() {
    // for range s { return 0 } -- the slice/len/index triple is dropped
    // before the return.
    let mut b = B::new();
    let elems = vec![b.int(1)];
    let lit = b.lit_of(B::int_slice(), elems);
    let def = b.define("s", lit);
    let s = b.tident("s", B::int_slice());
    let z = b.int(0);
    let ret_in = b.ret(vec![z]);
    let range = b.range_stmt(None, None, s, vec![ret_in]);
    let z2 = b.int(0);
    let ret = b.ret(vec![z2]);
    let main = b.main_fn(vec![def, range, ret]);
    let bytes = compile_main(b, main);
    let ops = op_list(&bytes);
    assert!(has_run(&ops, &[Drop, Drop, Drop, Push0, Ret]));
}

#[test]
fn labelled_break_drains_inner_range() {
    // out: for range s { for range s { break out } }; return 0
    let mut b = B::new();
    let elems = vec![b.int(1)];
    let lit = b.lit_of(B::int_slice(), elems);
    let def = b.define("s", lit);
    let s_outer = b.tident("s", B::int_slice());
    let s_inner = b.tident("s", B::int_slice());
    let brk = b.brk(Some("out"));
    let inner = b.range_stmt(None, None, s_inner, vec![brk]);
    let outer = b.range_stmt(None, None, s_outer, vec![inner]);
    let outer = b.labeled("out", outer);
    let z = b.int(0);
    let ret = b.ret(vec![z]);
    let main = b.main_fn(vec![def, outer, ret]);
    let bytes = compile_main(b, main);
    let ops = op_list(&bytes);
    // the inner loop's three stack items are dropped before the jump out
    assert!(has_run(&ops, &[Drop, Drop, Drop, Jmp]));
}

#[test]
fn short_circuit_or() {
    // return a || b
    let mut b = B::new();
    let a = b.ident("a");
    let b2 = b.ident("b");
    let or = b.bin(a, BinaryOp::LogOr, b2);
    let ret = b.ret(vec![or]);
    let pa = b.param("a", Type::Bool);
    let pb = b.param("b", Type::Bool);
    let result = b.result(Type::Bool);
    let main = b.func("Main", vec![pa, pb], vec![result], vec![ret]);
    let bytes = compile_main(b, main);
    // left true jumps straight to the constant push; the right operand is
    // never evaluated on that path
    assert_eq!(
        op_list(&bytes),
        vec![InitSlot, LdArg0, JmpIf, LdArg1, Jmp, Push1, Ret]
    );
}

#[test]
fn nil_comparison() {
    // var a []byte; if a != nil { return 1 }; return 2
    let mut b = B::new();
    let decl = b.var_decl("a", B::byte_slice());
    let a = b.ident("a");
    let nil = b.nil();
    let cond = b.bin(a, BinaryOp::NotEq, nil);
    let one = b.int(1);
    let ret1 = b.ret(vec![one]);
    let ifs = b.if_stmt(cond, vec![ret1], None);
    let two = b.int(2);
    let ret2 = b.ret(vec![two]);
    let main = b.main_fn(vec![decl, ifs, ret2]);
    let bytes = compile_main(b, main);
    assert_eq!(
        op_list(&bytes),
        vec![InitSlot, PushNull, StLoc0, LdLoc0, IsNull, JmpIf, Push1, Ret, Push2, Ret]
    );
}

#[test]
fn len_handles_nil() {
    // return len(a)
    let mut b = B::new();
    let callee = b.ident("len");
    let a = b.tident("a", B::byte_slice());
    let call = b.call(callee, vec![a]);
    let ret = b.ret(vec![call]);
    let pa = b.param("a", B::byte_slice());
    let result = b.result(Type::Int);
    let main = b.func("Main", vec![pa], vec![result], vec![ret]);
    let bytes = compile_main(b, main);
    let ops = op_list(&bytes);
    assert!(has_run(&ops, &[Dup, IsNull, JmpIf, Size, Jmp, Drop, Push0]));
}

#[test]
fn copy_byte_slices() {
    // src := []byte{3,2,1}; dst := make([]byte, 2); copy(dst, src); return 0
    let mut b = B::new();
    let elems = vec![b.int(3), b.int(2), b.int(1)];
    let lit = b.lit_of(B::byte_slice(), elems);
    let def_src = b.define("src", lit);
    let two = b.int(2);
    let mk = b.make(B::byte_slice(), Some(two));
    let def_dst = b.define("dst", mk);
    let callee = b.ident("copy");
    let dst = b.tident("dst", B::byte_slice());
    let src = b.tident("src", B::byte_slice());
    let call = b.call(callee, vec![dst, src]);
    let copy_stmt = b.expr_stmt(call);
    let z = b.int(0);
    let ret = b.ret(vec![z]);
    let main = b.main_fn(vec![def_src, def_dst, copy_stmt, ret]);
    let bytes = compile_main(b, main);
    let ops = op_list(&bytes);
    assert!(has_run(
        &ops,
        &[Push0, Swap, Push0, Over, Size, Push4, Pick, Size, Min, MemCpy]
    ));
}

#[test]
fn copy_rejects_non_byte_slices() {
    let mut b = B::new();
    let callee = b.ident("copy");
    let dst = b.tident("dst", B::int_slice());
    let src = b.tident("src", B::int_slice());
    let call = b.call(callee, vec![dst, src]);
    let copy_stmt = b.expr_stmt(call);
    let z = b.int(0);
    let ret = b.ret(vec![z]);
    let e1 = {
        let elems = vec![b.int(1)];
        let lit = b.lit_of(B::int_slice(), elems);
        b.define("dst", lit)
    };
    let e2 = {
        let elems = vec![b.int(1)];
        let lit = b.lit_of(B::int_slice(), elems);
        b.define("src", lit)
    };
    let main = b.main_fn(vec![e1, e2, copy_stmt, ret]);
    let program = b.program(vec![B::file(vec![main])]);
    let err = compile(&program).unwrap_err();
    assert!(matches!(err, CodegenError::Unsupported(msg) if msg.contains("copy")));
}

#[test]
fn panic_lowerings() {
    // panic("boom") logs then throws
    let mut b = B::new();
    let callee = b.ident("panic");
    let msg = b.str_("boom");
    let call = b.call(callee, vec![msg]);
    let stmt = b.expr_stmt(call);
    let z = b.int(0);
    let ret = b.ret(vec![z]);
    let main = b.main_fn(vec![stmt, ret]);
    let bytes = compile_main(b, main);
    let ops = op_list(&bytes);
    assert!(has_run(&ops, &[PushData1, Syscall, Throw]));

    // panic(nil) just throws
    let mut b = B::new();
    let callee = b.ident("panic");
    let nil = b.nil();
    let call = b.call(callee, vec![nil]);
    let stmt = b.expr_stmt(call);
    let z = b.int(0);
    let ret = b.ret(vec![z]);
    let main = b.main_fn(vec![stmt, ret]);
    let bytes = compile_main(b, main);
    assert!(has_run(&op_list(&bytes), &[Drop, Throw]));

    // panic(42) is rejected
    let mut b = B::new();
    let callee = b.ident("panic");
    let n = b.int(42);
    let call = b.call(callee, vec![n]);
    let stmt = b.expr_stmt(call);
    let z = b.int(0);
    let ret = b.ret(vec![z]);
    let main = b.main_fn(vec![stmt, ret]);
    let program = b.program(vec![B::file(vec![main])]);
    assert!(matches!(
        compile(&program),
        Err(CodegenError::Unsupported(msg)) if msg.contains("panic")
    ));
}

#[test]
fn empty_composite_literals() {
    // a := []int{}; c := []byte{}; return 0
    let mut b = B::new();
    let lit_int = b.lit_of(B::int_slice(), vec![]);
    let def_a = b.define("a", lit_int);
    let lit_bytes = b.lit_of(B::byte_slice(), vec![]);
    let def_c = b.define("c", lit_bytes);
    let z = b.int(0);
    let ret = b.ret(vec![z]);
    let main = b.main_fn(vec![def_a, def_c, ret]);
    let bytes = compile_main(b, main);
    let ops = op_list(&bytes);
    assert!(has_run(&ops, &[Push0, Pack]));
    assert!(has_run(&ops, &[PushData1, Convert]));
}

#[test]
fn switch_with_fallthrough_into_default() {
    // x := 1; switch x { case 1: fallthrough; default: return 5 }; return 0
    let mut b = B::new();
    let one = b.int(1);
    let def = b.define("x", one);
    let tag = b.tident("x", Type::Int);
    let case1 = b.int(1);
    let ft = b.fallthrough();
    let five = b.int(5);
    let ret5 = b.ret(vec![five]);
    let sw = b.switch_stmt(tag, vec![(vec![case1], vec![ft]), (vec![], vec![ret5])]);
    let z = b.int(0);
    let ret = b.ret(vec![z]);
    let main = b.main_fn(vec![def, sw, ret]);
    let bytes = compile_main(b, main);
    let ops = op_list(&bytes);
    // numeric tag compares with NUMEQUAL
    assert!(has_run(&ops, &[Dup, Push1, NumEqual, JmpIfNot]));
    // return inside the switch drains the tag first
    assert!(has_run(&ops, &[Drop, Push5, Ret]));
}
