use autotrace::trace::Origin;
use autotrace::{
    ArgShadow, CallArgs, DType, Error, SharedTensor, Signature, Symbolic, SymbolicConfig, Tensor,
    Var,
};

// ══════════════════════════════════════════════
//  Shadow maps
// ══════════════════════════════════════════════

#[test]
fn passthrough_result_keeps_argument_shadow() {
    let mut s = Symbolic::new(Signature::new(["x", "y"]), |fr| {
        let x = fr.arg("x")?;
        let y = fr.arg("y")?;
        for _ in 0..3 {
            let tmp = x * 2.0 + y;
            let _ = tmp.exp();
        }
        Ok((x, x + y))
    });
    s.trace(&CallArgs::positional([1.0, 2.0])).unwrap();

    let x = s.get_symbolic_arg("x").unwrap();
    assert_eq!(s.s_results()[0], x);
    assert_ne!(s.s_results()[1], x);
    assert_eq!(
        s.s_vars().get(x).unwrap().origin(),
        &Origin::Argument("x".to_string())
    );
}

#[test]
fn retrace_invalidates_old_handles() {
    let mut s = Symbolic::new(Signature::new(["x"]), |fr| Ok(fr.arg("x")?.sin()));
    let call = CallArgs::new().arg(0.5);
    s.trace(&call).unwrap();
    let old = s.s_results()[0];
    s.trace(&call).unwrap();
    assert!(s.s_vars().get(old).is_none());
    assert!(s.s_vars().get(s.s_results()[0]).is_some());
}

#[test]
fn varargs_and_keywords_in_order() {
    let sig = Signature::new(["a"]).with_varargs("rest").with_varkw("kw");
    let mut s = Symbolic::new(sig, |fr| {
        let mut acc = fr.arg("a")?;
        for i in 0..fr.num_varargs() {
            acc = acc * fr.vararg(i)?;
        }
        for k in fr.keywords() {
            acc = acc + fr.arg(k)?;
        }
        Ok(acc)
    });
    let call = CallArgs::positional([2.0, 3.0, 4.0]).kwarg("z", 1.0).kwarg("b", 5.0);
    s.trace(&call).unwrap();

    let names: Vec<&str> = s.s_args().iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["a", "rest", "b", "z"]);
    assert!(matches!(&s.s_args()[1].1, ArgShadow::Group(items) if items.len() == 2));
    assert_eq!(
        s.get_symbolic_arg("rest_0").unwrap(),
        match &s.s_args()[1].1 {
            ArgShadow::Group(items) => items[0],
            ArgShadow::Single(id) => *id,
        }
    );
}

#[test]
fn unused_vararg_item_is_untraced() {
    let mut s = Symbolic::new(Signature::new([] as [&str; 0]).with_varargs("xs"), |fr| {
        fr.vararg(0)
    });
    let err = s.trace(&CallArgs::positional([1.0, 2.0])).unwrap_err();
    assert!(matches!(err, Error::UntracedVarargItem { ref name, index: 1 } if name == "xs"));
}

// ══════════════════════════════════════════════
//  Binding
// ══════════════════════════════════════════════

#[test]
fn binding_errors() {
    let s = Symbolic::new(Signature::new(["x", "y"]), |fr| Ok(fr.arg("x")? + fr.arg("y")?));

    assert!(matches!(
        s.bind(&CallArgs::positional([1.0, 2.0, 3.0])),
        Err(Error::TooManyPositional { expected: 2, received: 3 })
    ));
    assert!(matches!(
        s.bind(&CallArgs::new().arg(1.0).kwarg("x", 2.0)),
        Err(Error::DuplicateArgument(ref n)) if n == "x"
    ));
    assert!(matches!(
        s.bind(&CallArgs::new().arg(1.0).kwarg("w", 2.0)),
        Err(Error::UnexpectedArgument(ref n)) if n == "w"
    ));
    assert!(matches!(
        s.bind(&CallArgs::new().arg(1.0)),
        Err(Error::MissingArgument(ref n)) if n == "y"
    ));
}

#[test]
fn force_float_x_casts_arguments() {
    let config = SymbolicConfig {
        force_float_x: true,
        float_x: DType::F32,
        ..Default::default()
    };
    let s = Symbolic::new(Signature::new(["x", "n"]), |fr| Ok(fr.arg("x")? * fr.arg("n")?))
        .with_config(config);
    let bound = s.bind(&CallArgs::new().arg(1.5).arg(3i64)).unwrap();
    let dtypes: Vec<DType> = bound.entries().iter().map(|e| e.value.dtype()).collect();
    assert_eq!(dtypes, vec![DType::F32, DType::I64]);
}

// ══════════════════════════════════════════════
//  Selective lookup
// ══════════════════════════════════════════════

#[test]
fn lookup_by_var_handle() {
    let captured = std::rc::Rc::new(std::cell::Cell::new(None::<Var>));
    let slot = captured.clone();
    let mut s = Symbolic::new(Signature::new(["x"]), move |fr| {
        let y = fr.arg("x")?.tanh();
        slot.set(Some(y));
        Ok(y * 3.0)
    });
    s.trace(&CallArgs::new().arg(0.1)).unwrap();

    let y = captured.get().unwrap();
    let id = s.get_symbolic_arg(y).unwrap();
    assert_eq!(id, y.id());
    assert!(matches!(s.s_vars().get(id).unwrap().origin(), Origin::Computed(_)));
}

#[test]
fn lookup_by_shared_storage() {
    let w = SharedTensor::new(Tensor::vector(&[1.0, 2.0]));
    let unused = SharedTensor::new(Tensor::vector(&[0.0]));
    let lifted = w.clone();
    let mut s = Symbolic::new(Signature::new(["x"]), move |fr| {
        Ok((fr.arg("x")? * Var::lift(&lifted)).sum())
    });
    s.trace(&CallArgs::new().arg(2.0)).unwrap();

    let id = s.get_symbolic_arg(&w).unwrap();
    assert_eq!(s.s_vars().get(id).unwrap().origin(), &Origin::Lifted);
    assert!(matches!(s.get_symbolic_arg(&unused), Err(Error::NotTraced(_))));
}

#[test]
fn lookup_by_ambiguous_integer() {
    let mut s = Symbolic::new(Signature::new(["a", "b"]), |fr| Ok(fr.arg("a")? + fr.arg("b")?));
    s.trace(&CallArgs::new().arg(1000i64).arg(1000i64)).unwrap();
    assert!(matches!(s.get_symbolic_arg(1000i64), Err(Error::AmbiguousInt(1000))));

    let msg = s.get_symbolic_arg(7i64).unwrap_err().to_string();
    assert!(msg.starts_with("Small integer arguments can not be traced selectively"));
}
