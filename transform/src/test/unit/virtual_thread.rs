//! Virtual-thread injection scenarios.

use std::rc::Rc;

use tenrec_dtype::DType;
use tenrec_ir::{
    AttrNode, CallKind, Expr, Stmt, access_ptr, attr, context_id, get_const_int, intrinsic, make_zero, simplify,
    type_annotation,
};
use test_case::test_case;

use crate::error::Error;
use crate::test::helpers::{
    BindingCensus, UseCensus, alloc, block_items, buffer_var, count_stmts, int32, load, scalar_var, store,
    vthread_attr,
};
use crate::virtual_thread::inject_virtual_thread;

fn simplified_const(expr: &Rc<Expr>) -> Option<i64> {
    get_const_int(&simplify(expr))
}

// =============================================================================
// Injection Shape
// =============================================================================

/// Two vthreads over a loop-free body unroll into a block pair: the touched
/// allocation is widened by the thread count and each replica lands in its
/// own slice.
#[test]
fn small_vthread_unrolls() {
    let v = scalar_var("v");
    let a = buffer_var("A");
    let body = alloc(&a, vec![int32(16)], &store(&a, &Expr::var(&v), &int32(0)));
    let input = vthread_attr(&v, "vthread", 2, &body);

    let output = inject_virtual_thread(&input).unwrap();

    let Stmt::Allocate { extents, body, .. } = output.as_ref() else {
        panic!("annotation must lower to the allocation:\n{output}")
    };
    assert_eq!(extents.len(), 2, "thread dimension prepended");
    assert_eq!(get_const_int(&extents[0]), Some(2));
    assert_eq!(get_const_int(&extents[1]), Some(16));

    let replicas = block_items(body);
    assert_eq!(replicas.len(), 2, "unrolled, not looped:\n{output}");
    for (thread, replica) in replicas.iter().enumerate() {
        let Stmt::Store { value, index, .. } = replica.as_ref() else { panic!("replica is a store:\n{replica}") };
        assert_eq!(simplified_const(value), Some(thread as i64));
        assert_eq!(simplified_const(index), Some(thread as i64 * 16), "thread steps by the per-thread stride");
    }
}

/// Thirty-two vthreads serialise into a loop over a fresh `v.s` variable.
#[test]
fn large_vthread_serialises() {
    let v = scalar_var("v");
    let a = buffer_var("A");
    let body = alloc(&a, vec![int32(16)], &store(&a, &Expr::var(&v), &int32(0)));
    let input = vthread_attr(&v, "vthread", 32, &body);

    let output = inject_virtual_thread(&input).unwrap();

    let Stmt::Allocate { extents, body, .. } = output.as_ref() else { unreachable!() };
    assert_eq!(get_const_int(&extents[0]), Some(32));

    let Stmt::For { loop_var, min, extent, body, .. } = body.as_ref() else {
        panic!("expected a serial thread loop:\n{output}")
    };
    assert_eq!(loop_var.name(), "v.s");
    assert_eq!(get_const_int(min), Some(0));
    assert_eq!(get_const_int(extent), Some(32));

    let Stmt::Store { index, .. } = body.as_ref() else { unreachable!() };
    let uses = UseCensus::of_expr(index).uses;
    assert!(!uses.is_empty());
    assert!(uses.iter().all(|id| *id == loop_var.id()), "the original v is substituted away");
}

#[test_case(2, true; "two threads unroll")]
#[test_case(15, true; "fifteen threads unroll")]
#[test_case(16, false; "sixteen threads loop")]
#[test_case(32, false; "thirty-two threads loop")]
fn unroll_threshold(num_threads: i64, unrolled: bool) {
    let v = scalar_var("v");
    let b = buffer_var("B");
    let input = vthread_attr(&v, "vthread", num_threads, &store(&b, &int32(1), &Expr::var(&v)));

    let output = inject_virtual_thread(&input).unwrap();

    if unrolled {
        let replicas = block_items(&output);
        assert_eq!(replicas.len(), num_threads as usize);
        let indices: Vec<_> = replicas
            .iter()
            .map(|replica| {
                let Stmt::Store { index, .. } = replica.as_ref() else { panic!("replica is a store") };
                simplified_const(index).unwrap()
            })
            .collect();
        assert_eq!(indices, (0..num_threads).collect::<Vec<_>>());
    } else {
        let Stmt::For { extent, .. } = output.as_ref() else { panic!("expected a loop:\n{output}") };
        assert_eq!(get_const_int(extent), Some(num_threads));
    }
}

/// A loop below the injection point rules unrolling out even for small
/// thread counts.
#[test]
fn loop_bearing_body_serialises() {
    let v = scalar_var("v");
    let i = scalar_var("i");
    let b = buffer_var("B");
    let inner = Stmt::for_(
        &i,
        &int32(0),
        &Expr::var(&v).add(&int32(1)),
        tenrec_ir::ForKind::Serial,
        &store(&b, &int32(1), &Expr::var(&i)),
    );
    let input = vthread_attr(&v, "vthread", 2, &inner);

    let output = inject_virtual_thread(&input).unwrap();

    let Stmt::For { loop_var, extent, body, .. } = output.as_ref() else {
        panic!("expected the injected thread loop:\n{output}")
    };
    assert_eq!(loop_var.name(), "v.s");
    assert_eq!(get_const_int(extent), Some(2));
    assert!(matches!(body.as_ref(), Stmt::For { .. }), "original loop survives inside:\n{output}");
}

// =============================================================================
// Sharing and Privatisation
// =============================================================================

/// Under `vthread`, allocations not touched by the thread variable stay
/// shared: no widening, no index rewrite, same node.
#[test]
fn vthread_shares_untouched_allocations() {
    let v = scalar_var("v");
    let b = buffer_var("B");
    let g = buffer_var("G");
    let untouched_store = store(&b, &int32(9), &int32(3));
    let body = alloc(&b, vec![int32(8)], &Stmt::block(&untouched_store, &store(&g, &Expr::var(&v), &Expr::var(&v))));
    let input = vthread_attr(&v, "vthread", 2, &body);

    let output = inject_virtual_thread(&input).unwrap();

    let Stmt::Allocate { extents, body, .. } = output.as_ref() else { unreachable!() };
    assert_eq!(extents.len(), 1, "untouched allocation keeps its shape");
    assert_eq!(get_const_int(&extents[0]), Some(8));

    let Stmt::Block { first, rest } = body.as_ref() else { unreachable!() };
    assert!(matches!(first.as_ref(), Stmt::Store { .. }), "untouched store survives as a single copy");
    assert_eq!(count_stmts(first, |s| matches!(s, Stmt::Store { .. })), 1);
    assert_eq!(count_stmts(rest, |s| matches!(s, Stmt::Store { .. })), 2, "touched store is replicated");
}

/// Under `cthread`, even untouched allocations are privatised, and
/// `context_id()` becomes the thread variable.
#[test]
fn cthread_privatises_untouched_allocations() {
    let v = scalar_var("v");
    let b = buffer_var("B");
    let body = alloc(&b, vec![int32(8)], &Stmt::evaluate(&context_id()));
    let input = vthread_attr(&v, "cthread", 4, &body);

    let output = inject_virtual_thread(&input).unwrap();

    let Stmt::Allocate { extents, body, .. } = output.as_ref() else { unreachable!() };
    assert_eq!(extents.len(), 2, "privatised despite not depending on v");
    assert_eq!(get_const_int(&extents[0]), Some(4));

    let replicas = block_items(body);
    assert_eq!(replicas.len(), 4);
    for (thread, replica) in replicas.iter().enumerate() {
        let Stmt::Evaluate(value) = replica.as_ref() else { panic!("replica is an evaluate") };
        assert_eq!(simplified_const(value), Some(thread as i64), "context_id is the thread identity");
    }
    assert!(!output.to_string().contains(intrinsic::CONTEXT_ID));
}

/// `context_id()` stays opaque under `vthread`.
#[test]
fn context_id_is_shared_under_vthread() {
    let v = scalar_var("v");
    let input = vthread_attr(&v, "vthread", 4, &Stmt::evaluate(&context_id()));

    let output = inject_virtual_thread(&input).unwrap();
    assert!(output.to_string().contains(intrinsic::CONTEXT_ID));
    assert_eq!(count_stmts(&output, |s| matches!(s, Stmt::Evaluate(_))), 1, "nothing touched, nothing replicated");
}

/// A body with no dependence on the thread variable drops the annotation
/// without replication.
#[test]
fn untouched_body_drops_the_annotation() {
    let v = scalar_var("v");
    let b = buffer_var("B");
    let body = store(&b, &int32(1), &int32(7));
    let input = vthread_attr(&v, "vthread", 8, &body);

    let output = inject_virtual_thread(&input).unwrap();
    assert_eq!(output.to_string(), body.to_string());
}

// =============================================================================
// Touched-Variable Analysis
// =============================================================================

/// Dependence flows through let chains: `x = v*2`, `y = x+1`, store via `y`
/// makes the allocation thread-dependent.
#[test]
fn touched_closure_follows_let_chains() {
    let v = scalar_var("v");
    let x = scalar_var("x");
    let y = scalar_var("y");
    let a = buffer_var("A");
    let chain = Stmt::let_stmt(
        &x,
        &Expr::var(&v).mul(&int32(2)),
        &Stmt::let_stmt(&y, &Expr::var(&x).add(&int32(1)), &store(&a, &int32(1), &Expr::var(&y))),
    );
    let input = vthread_attr(&v, "vthread", 2, &alloc(&a, vec![int32(16)], &chain));

    let output = inject_virtual_thread(&input).unwrap();

    let Stmt::Allocate { extents, .. } = output.as_ref() else { unreachable!() };
    assert_eq!(extents.len(), 2, "transitively touched allocation is widened");

    // Replication re-bound x and y twice; SSA must have separated them.
    assert_eq!(count_stmts(&output, |s| matches!(s, Stmt::LetStmt { .. })), 4);
    assert_eq!(BindingCensus::of(&output).max_bindings(), 1);
}

/// A use can be recorded before its source turns out thread-dependent:
/// `t` reads `X` before anything stores `v` into `X`. Only the affect-edge
/// fixed point makes `t` (and through it `A`) touched.
#[test]
fn closure_handles_uses_recorded_before_touch() {
    let v = scalar_var("v");
    let t = scalar_var("t");
    let x = buffer_var("X");
    let a = buffer_var("A");

    let use_t = alloc(&a, vec![int32(4)], &store(&a, &Expr::var(&t), &int32(0)));
    let taint_x = store(&x, &Expr::var(&v), &int32(0));
    let body = Stmt::let_stmt(&t, &load(&x, &int32(3)), &Stmt::block(&taint_x, &use_t));
    let input = vthread_attr(&v, "vthread", 2, &alloc(&x, vec![int32(4)], &body));

    let output = inject_virtual_thread(&input).unwrap();

    let Stmt::Allocate { extents, .. } = output.as_ref() else { unreachable!() };
    assert_eq!(extents.len(), 2, "X is stored from v, so it is widened");

    // A is reached only through t; the closure X -> t -> A must widen every
    // replica of its allocation.
    let widened_a = |s: &Stmt| {
        matches!(s, Stmt::Allocate { buffer, extents, .. } if buffer.name() == "A" && extents.len() == 2)
    };
    let narrow_a =
        |s: &Stmt| matches!(s, Stmt::Allocate { buffer, extents, .. } if buffer.name() == "A" && extents.len() == 1);
    assert_eq!(count_stmts(&output, widened_a), 2, "one widened copy of A per thread:\n{output}");
    assert_eq!(count_stmts(&output, narrow_a), 0);
}

/// Writes through `access_ptr` handles inside `Evaluate` count as binding
/// effects: a DMA whose offset depends on v privatises the buffer.
#[test]
fn access_ptr_write_marks_the_buffer() {
    let v = scalar_var("v");
    let a = buffer_var("A");
    let copy = Expr::call(
        DType::int32(),
        "dma_copy",
        vec![access_ptr(DType::int32(), &a, &Expr::var(&v).mul(&int32(4)), &int32(4), 2)],
        CallKind::Extern,
    );
    let input = vthread_attr(&v, "vthread", 2, &alloc(&a, vec![int32(16)], &Stmt::evaluate(&copy)));

    let output = inject_virtual_thread(&input).unwrap();

    let Stmt::Allocate { extents, body, .. } = output.as_ref() else { unreachable!() };
    assert_eq!(extents.len(), 2);

    // The handle offset steps by the per-thread element stride.
    let replicas = block_items(body);
    assert_eq!(replicas.len(), 2);
    let offset_of = |replica: &Rc<Stmt>| {
        let Stmt::Evaluate(call) = replica.as_ref() else { panic!("replica is an evaluate") };
        let Expr::Call { args, .. } = call.as_ref() else { unreachable!() };
        let Expr::Call { name, args, .. } = args[0].as_ref() else { panic!("dma argument is the access_ptr") };
        assert_eq!(name, intrinsic::ACCESS_PTR);
        simplified_const(&args[2]).unwrap()
    };
    assert_eq!(offset_of(&replicas[0]), 0);
    assert_eq!(offset_of(&replicas[1]), 20, "stride 16 plus the original offset 4");
}

// =============================================================================
// Co-processor Scopes
// =============================================================================

/// Under cthread a co-processor scope must not straddle thread identities:
/// the whole attribute is replicated even when nothing in it is touched.
#[test]
fn coproc_scope_forces_injection_under_cthread() {
    let v = scalar_var("v");
    let b = buffer_var("B");
    let region = Stmt::attr(AttrNode::None, attr::COPROC_UOP_SCOPE, &int32(0), &store(&b, &int32(1), &int32(2)));
    let input = vthread_attr(&v, "cthread", 2, &region);

    let output = inject_virtual_thread(&input).unwrap();

    let replicas = block_items(&output);
    assert_eq!(replicas.len(), 2);
    for replica in &replicas {
        assert!(
            matches!(replica.as_ref(), Stmt::AttrStmt { key, .. } if key == attr::COPROC_UOP_SCOPE),
            "each thread gets its own region:\n{output}"
        );
    }
}

/// The same region under vthread shares fine.
#[test]
fn coproc_scope_is_shared_under_vthread() {
    let v = scalar_var("v");
    let b = buffer_var("B");
    let region = Stmt::attr(AttrNode::None, attr::COPROC_UOP_SCOPE, &int32(0), &store(&b, &int32(1), &int32(2)));
    let input = vthread_attr(&v, "vthread", 2, &region);

    let output = inject_virtual_thread(&input).unwrap();
    assert_eq!(count_stmts(&output, |s| matches!(s, Stmt::AttrStmt { .. })), 1);
}

// =============================================================================
// Nesting and Idempotence
// =============================================================================

/// Nested annotations lower inner-out; two two-way threads yield four
/// replicas covering the index cross product.
#[test]
fn nested_annotations_compose() {
    let u = scalar_var("u");
    let v = scalar_var("v");
    let b = buffer_var("B");
    let body = store(&b, &int32(1), &Expr::var(&u).add(&Expr::var(&v)));
    let input = vthread_attr(&u, "vthread", 2, &vthread_attr(&v, "vthread", 2, &body));

    let output = inject_virtual_thread(&input).unwrap();

    let stores = block_items(&output);
    assert_eq!(stores.len(), 4);
    let mut indices: Vec<_> = stores
        .iter()
        .map(|stmt| {
            let Stmt::Store { index, .. } = stmt.as_ref() else { panic!("expected store:\n{stmt}") };
            simplified_const(index).unwrap()
        })
        .collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1, 1, 2]);
}

/// Injection is idempotent once no annotations remain.
#[test]
fn reapplication_is_identity() {
    let v = scalar_var("v");
    let a = buffer_var("A");
    let body = alloc(&a, vec![int32(16)], &store(&a, &Expr::var(&v), &int32(0)));
    let input = vthread_attr(&v, "vthread", 2, &body);

    let once = inject_virtual_thread(&input).unwrap();
    let twice = inject_virtual_thread(&once).unwrap();
    assert_eq!(once.to_string(), twice.to_string());
}

// =============================================================================
// Fatal Conditions
// =============================================================================

#[test]
fn provide_nodes_are_rejected() {
    let input = Stmt::provide("T", &int32(0), vec![int32(0)]);
    assert_eq!(inject_virtual_thread(&input).unwrap_err(), Error::UnflattenedProvide);
}

#[test]
fn non_constant_rw_mask_is_rejected() {
    let v = scalar_var("v");
    let a = buffer_var("A");
    let mask = scalar_var("m");
    let call = Expr::call(
        DType::handle(),
        intrinsic::ACCESS_PTR,
        vec![type_annotation(DType::int32()), Expr::var(&a), int32(0), int32(4), Expr::var(&mask)],
        CallKind::Intrinsic,
    );
    let input = vthread_attr(&v, "vthread", 2, &Stmt::evaluate(&call));
    assert_eq!(inject_virtual_thread(&input).unwrap_err(), Error::NonConstantRwMask);
}

#[test]
fn access_ptr_buffer_must_be_a_variable() {
    let v = scalar_var("v");
    let call = Expr::call(
        DType::handle(),
        intrinsic::ACCESS_PTR,
        vec![type_annotation(DType::int32()), int32(0), int32(0), int32(4), int32(1)],
        CallKind::Intrinsic,
    );
    let input = vthread_attr(&v, "vthread", 2, &Stmt::evaluate(&call));
    assert_eq!(inject_virtual_thread(&input).unwrap_err(), Error::AccessPtrBufferNotVar);
}

/// A widened buffer escaping as a bare handle would alias across threads.
#[test]
fn escaping_buffer_handle_is_fatal() {
    let v = scalar_var("v");
    let a = buffer_var("A");
    let leak = Expr::call(DType::int32(), "leak", vec![Expr::var(&a)], CallKind::Extern);
    let body = Stmt::block(&store(&a, &Expr::var(&v), &int32(0)), &Stmt::evaluate(&leak));
    let input = vthread_attr(&v, "vthread", 2, &alloc(&a, vec![int32(16)], &body));

    assert_eq!(inject_virtual_thread(&input).unwrap_err(), Error::BufferEscapes { name: "A".into() });
}

#[test]
fn loops_must_start_at_zero() {
    let v = scalar_var("v");
    let i = scalar_var("i");
    let b = buffer_var("B");
    let body = Stmt::for_(&i, &int32(1), &int32(4), tenrec_ir::ForKind::Serial, &store(&b, &int32(1), &Expr::var(&v)));
    let input = vthread_attr(&v, "vthread", 2, &body);
    assert_eq!(inject_virtual_thread(&input).unwrap_err(), Error::NonZeroLoopBase);
}

#[test]
fn thread_extent_must_be_a_positive_constant() {
    let v = scalar_var("v");
    let n = scalar_var("n");
    let b = buffer_var("B");
    let body = store(&b, &int32(1), &Expr::var(&v));

    let symbolic = Stmt::attr(
        AttrNode::IterVar(tenrec_ir::IterVar::new(&v, "vthread")),
        attr::VIRTUAL_THREAD,
        &Expr::var(&n),
        &body,
    );
    assert_eq!(inject_virtual_thread(&symbolic).unwrap_err(), Error::MissingThreadExtent);

    let zero = vthread_attr(&v, "vthread", 0, &body);
    assert_eq!(inject_virtual_thread(&zero).unwrap_err(), Error::MissingThreadExtent);
}

#[test]
fn annotation_node_must_be_an_iter_var() {
    let v = scalar_var("v");
    let b = buffer_var("B");
    let input = Stmt::attr(AttrNode::Var(v.clone()), attr::VIRTUAL_THREAD, &int32(2), &store(&b, &int32(1), &int32(0)));
    assert_eq!(inject_virtual_thread(&input).unwrap_err(), Error::MalformedThreadAttr);
}

// =============================================================================
// SSA Invariant
// =============================================================================

/// Every variable has exactly one binding site after the pass, whatever got
/// replicated.
#[test]
fn output_is_in_ssa_form() {
    let v = scalar_var("v");
    let x = scalar_var("x");
    let a = buffer_var("A");
    let body = alloc(
        &a,
        vec![int32(16)],
        &Stmt::let_stmt(&x, &Expr::var(&v).mul(&int32(2)), &store(&a, &Expr::var(&x), &Expr::var(&x))),
    );
    let input = vthread_attr(&v, "vthread", 4, &body);

    let output = inject_virtual_thread(&input).unwrap();
    assert_eq!(count_stmts(&output, |s| matches!(s, Stmt::LetStmt { .. })), 4);
    assert_eq!(BindingCensus::of(&output).max_bindings(), 1);
}

#[test]
fn serial_loop_starts_at_make_zero() {
    let v = scalar_var("v");
    let b = buffer_var("B");
    let input = vthread_attr(&v, "vthread", 16, &store(&b, &int32(1), &Expr::var(&v)));

    let output = inject_virtual_thread(&input).unwrap();
    let Stmt::For { min, .. } = output.as_ref() else { panic!("expected loop:\n{output}") };
    assert_eq!(min.to_string(), make_zero(DType::int32()).to_string());
}
