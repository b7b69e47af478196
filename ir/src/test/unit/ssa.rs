//! SSA re-canonicalisation after subtree replication.

use std::rc::Rc;

use tenrec_dtype::DType;

use crate::expr::Expr;
use crate::ops::const_true;
use crate::ssa::convert_ssa;
use crate::stmt::Stmt;
use crate::test::helpers::{BindingCensus, buffer_var, int32, scalar_var};

/// Two copies of the same let-binding, as unrolling produces them.
#[test]
fn repeated_let_binding_is_renamed() {
    let x = scalar_var("x");
    let a = buffer_var("A");
    let body = |value: i64| {
        Stmt::let_stmt(&x, &int32(value), &Stmt::store(&a, &Expr::var(&x), &int32(0), &const_true(1)))
    };
    let block = Stmt::block(&body(0), &body(1));
    assert_eq!(BindingCensus::of(&block).counts[&x.id()], 2);

    let canonical = convert_ssa(&block);
    assert_eq!(BindingCensus::of(&canonical).max_bindings(), 1);

    // The second copy now binds a fresh variable, and its use follows.
    let Stmt::Block { first, rest } = canonical.as_ref() else { unreachable!() };
    let Stmt::LetStmt { var: first_var, body: first_body, .. } = first.as_ref() else { unreachable!() };
    let Stmt::LetStmt { var: second_var, body: second_body, .. } = rest.as_ref() else { unreachable!() };
    assert!(first_var.same_as(&x), "first binding keeps its identity");
    assert!(!second_var.same_as(&x), "second binding must be renamed");
    assert_eq!(second_var.name(), "x", "renaming keeps the name hint");

    let stored = |stmt: &Rc<Stmt>| {
        let Stmt::Store { value, .. } = stmt.as_ref() else { unreachable!() };
        value.as_var().cloned().unwrap_or_else(|| panic!("store of a variable"))
    };
    assert!(stored(first_body).same_as(&x));
    assert!(stored(second_body).same_as(second_var));
}

#[test]
fn repeated_allocation_renames_buffer_and_accesses() {
    let b = buffer_var("B");
    let alloc = || {
        let body = Stmt::store(&b, &int32(1), &int32(0), &const_true(1));
        Stmt::allocate(&b, DType::float32(), vec![int32(8)], &const_true(1), &body, None, None)
    };
    let block = Stmt::block(&alloc(), &alloc());

    let canonical = convert_ssa(&block);
    assert_eq!(BindingCensus::of(&canonical).max_bindings(), 1);

    let Stmt::Block { first, rest } = canonical.as_ref() else { unreachable!() };
    let Stmt::Allocate { buffer: b1, body: body1, .. } = first.as_ref() else { unreachable!() };
    let Stmt::Allocate { buffer: b2, body: body2, .. } = rest.as_ref() else { unreachable!() };
    assert!(b1.same_as(&b));
    assert!(!b2.same_as(&b));

    let store_target = |stmt: &Rc<Stmt>| {
        let Stmt::Store { buffer, .. } = stmt.as_ref() else { unreachable!() };
        buffer.clone()
    };
    assert!(store_target(body1).same_as(b1));
    assert!(store_target(body2).same_as(b2), "store inside the renamed scope follows the new buffer");
}

#[test]
fn shadowing_resolves_to_the_innermost_binding() {
    let i = scalar_var("i");
    let a = buffer_var("A");
    let inner = Stmt::for_(
        &i,
        &int32(0),
        &int32(2),
        crate::types::ForKind::Serial,
        &Stmt::store(&a, &Expr::var(&i), &Expr::var(&i), &const_true(1)),
    );
    let outer = Stmt::for_(&i, &int32(0), &int32(4), crate::types::ForKind::Serial, &inner);

    let canonical = convert_ssa(&outer);
    assert_eq!(BindingCensus::of(&canonical).max_bindings(), 1);

    let Stmt::For { loop_var: outer_var, body, .. } = canonical.as_ref() else { unreachable!() };
    let Stmt::For { loop_var: inner_var, body: inner_body, .. } = body.as_ref() else { unreachable!() };
    assert!(outer_var.same_as(&i));
    assert!(!inner_var.same_as(&i));
    let Stmt::Store { index, .. } = inner_body.as_ref() else { unreachable!() };
    assert!(index.as_var().is_some_and(|v| v.same_as(inner_var)), "use resolves to the innermost binding");
}

#[test]
fn unique_bindings_are_preserved() {
    let x = scalar_var("x");
    let y = scalar_var("y");
    let a = buffer_var("A");
    let stmt = Stmt::let_stmt(
        &x,
        &int32(1),
        &Stmt::let_stmt(&y, &Expr::var(&x), &Stmt::store(&a, &Expr::var(&y), &int32(0), &const_true(1))),
    );

    let canonical = convert_ssa(&stmt);
    let Stmt::LetStmt { var: x2, body, .. } = canonical.as_ref() else { unreachable!() };
    let Stmt::LetStmt { var: y2, .. } = body.as_ref() else { unreachable!() };
    assert!(x2.same_as(&x));
    assert!(y2.same_as(&y));
}

#[test]
fn attribute_nodes_follow_renamed_buffers() {
    let b = buffer_var("B");
    let alloc = |body: &Rc<Stmt>| Stmt::allocate(&b, DType::float32(), vec![int32(4)], &const_true(1), body, None, None);
    let attr_body = Stmt::attr(
        crate::stmt::AttrNode::Var(b.clone()),
        "storage_scope",
        &int32(0),
        &Stmt::store(&b, &int32(0), &int32(0), &const_true(1)),
    );
    let block = Stmt::block(&alloc(&Stmt::evaluate(&int32(0))), &alloc(&attr_body));

    let canonical = convert_ssa(&block);
    let Stmt::Block { rest, .. } = canonical.as_ref() else { unreachable!() };
    let Stmt::Allocate { buffer: renamed, body, .. } = rest.as_ref() else { unreachable!() };
    assert!(!renamed.same_as(&b));
    let Stmt::AttrStmt { node, .. } = body.as_ref() else { unreachable!() };
    assert!(node.as_var().is_some_and(|v| v.same_as(renamed)), "attr node follows the renamed buffer");
}

/// A fresh unrolled pair must also end up alias-free when the loop variable
/// was substituted with constants (`Var` uses vanish, bindings remain).
#[test]
fn census_helper_counts_every_binding_kind() {
    let x = scalar_var("x");
    let i = scalar_var("i");
    let b = buffer_var("B");
    let stmt = Stmt::let_stmt(
        &x,
        &int32(1),
        &Stmt::for_(
            &i,
            &int32(0),
            &int32(2),
            crate::types::ForKind::Serial,
            &Stmt::allocate(&b, DType::int32(), vec![int32(2)], &const_true(1), &Stmt::evaluate(&int32(0)), None, None),
        ),
    );
    let census = BindingCensus::of(&stmt);
    assert_eq!(census.counts.len(), 3);
    assert_eq!(census.max_bindings(), 1);
}
