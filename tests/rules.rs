use tensor_eqsat::{rewrite as rw, *};

fn algebraic() -> Vec<Rewrite> {
    rules::algebraic().rules
}

fn markers() -> Vec<Rewrite> {
    rules::markers().rules
}

fn lowering() -> Vec<Rewrite> {
    rules::lowering().rules
}

fn everything() -> Vec<Rewrite> {
    rules::all().into_iter().flat_map(|set| set.rules).collect()
}

test_fn! {
    fold_nested_constants, algebraic(),
    "(add (mul 2 3) (sub 10 4))" => "12"
}

test_fn! {
    identities_through_commutativity, algebraic(),
    "(add 0 (mul 1 x))" => "x"
}

test_fn! {
    double_negation, algebraic(),
    "(neg (neg (add a b)))" => "(add a b)", "(add b a)"
}

test_fn! {
    project_tuple, algebraic(),
    "(get@1 (tuple a b c))" => "b"
}

test_fn! {
    out_of_range_projection_stays, algebraic(),
    "(get@3 (tuple a b c))" => "(get@3 (tuple a b c))"
    @check |r: Runner| assert_eq!(r.egraph.number_of_classes(), 5)
}

test_fn! {
    strip_markers_once, markers(),
    runner = Runner::default().with_mode(Mode::Once),
    "(marker (identity (dequantize@0.5 (quantize@0.5 x))))" => "x"
    @check |r: Runner| {
        assert_eq!(r.stop_reason, Some(StopReason::SingleSweep));
        assert_eq!(r.iterations[0].applied.len(), 3);
    }
}

test_fn! {
    keep_mismatched_quantization, markers(),
    runner = Runner::default().with_mode(Mode::Once),
    "(dequantize@0.5 (quantize@0.25 x))" => "(dequantize@0.5 (quantize@0.25 x))"
    @check |r: Runner| {
        let x = r.egraph.lookup_expr(&"x".parse().unwrap()).unwrap();
        assert_ne!(r.egraph.find(r.roots[0]), r.egraph.find(x));
    }
}

test_fn! {
    cancel_transposes, lowering(),
    "(transpose (transpose (neg x)))" => "(neg x)"
}

test_fn! {
    keep_permuting_transposes, lowering(),
    "(transpose@[1,0] (transpose@[1,0] x))" => "(transpose@[1,0] (transpose@[1,0] x))"
    @check |r: Runner| assert_eq!(r.egraph.total_number_of_nodes(), 3)
}

test_fn! {
    lower_square_matmul, lowering(),
    "(matmul:f32[4,4] w:f32[4,4] v:f32[4,4])" => "(gemm w v)"
}

test_fn! {
    whole_pipeline, everything(),
    "(relu:f32[8,16] (add:f32[8,16] \
        (identity:f32[8,16] (matmul:f32[8,16] a:f32[8,32] b:f32[32,16])) \
        (mul:f32[16] c:f32[16] 1)))"
    =>
    "(gemm_bias_relu a b c)"
}

test_fn! {
    custom_rules_mix_with_built_ins,
    {
        let mut rules = algebraic();
        rules.push(rw!("sub-self"; "(sub ?x ?x)" => "0"));
        rules
    },
    "(add (sub y y) z)" => "z"
}

#[test]
fn session_runs_sets_in_order() {
    let _ = env_logger::builder().is_test(true).try_init();
    let session = Session::new();
    let expr: RecExpr = "(relu:f32[2,4] (add:f32[2,4] \
                           (marker:f32[2,4] (matmul:f32[2,4] a:f32[2,3] b:f32[3,4])) \
                           (add:f32[4] c:f32[4] 0)))"
        .parse()
        .unwrap();
    let (_, best) = session
        .optimize(&expr, &["markers", "algebraic", "lowering", "fusion"])
        .unwrap();
    assert_eq!(
        best.to_string(),
        "(gemm_bias_relu:f32[2,4] a:f32[2,3] b:f32[3,4] c:f32[4])"
    );
}
