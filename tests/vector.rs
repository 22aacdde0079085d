use approx::assert_relative_eq;
use autotrace::{CallArgs, DType, Error, Signature, Tensor, VectorArgs, VectorMode};
use ndarray::array;

/// f(w, b) = sum(w^2) * b + b^3 for a 2x2 `w` and scalar `b`.
fn model(mode: VectorMode) -> VectorArgs {
    let call = CallArgs::new()
        .arg(Tensor::from(array![[1.0, 2.0], [3.0, 4.0]]))
        .arg(0.5);
    autotrace::vector_args(
        Signature::new(["w", "b"]),
        |fr| {
            let w = fr.arg("w")?;
            let b = fr.arg("b")?;
            Ok(w.square().sum() * b + b.powi(3))
        },
        &call,
        mode,
    )
    .unwrap()
}

// ══════════════════════════════════════════════
//  Layout
// ══════════════════════════════════════════════

#[test]
fn round_trip_is_exact() {
    let args = vec![
        Tensor::from(array![[0.1, -2.5], [3.25, 1e-300]]),
        Tensor::int(-7),
        Tensor::scalar(f64::MAX),
        Tensor::vector(&[]),
    ];
    let theta = VectorArgs::vector_from_args(&args);
    assert_eq!(theta.len(), 6);
    let back = VectorArgs::args_from_vector(theta.as_slice().unwrap(), &args).unwrap();
    assert_eq!(back, args);
    assert_eq!(back[1].dtype(), DType::I64);
}

#[test]
fn layout_records_offsets() {
    let va = model(VectorMode::VALUE);
    let layout = va.layout();
    assert_eq!(layout.len(), 5);
    let entries = layout.entries();
    assert_eq!(entries[0].name, "w");
    assert_eq!(entries[0].offset, 0);
    assert_eq!(entries[0].shape, vec![2, 2]);
    assert_eq!(entries[1].name, "b");
    assert_eq!(entries[1].offset, 4);
    assert_eq!(va.initial_vector().to_vec(), vec![1.0, 2.0, 3.0, 4.0, 0.5]);

    let args = va.args_from_layout(&[0.0, 0.0, 0.0, 1.0, 2.0]).unwrap();
    assert_eq!(args[0].shape(), &[2, 2]);
    assert_eq!(args[1].as_scalar(), Some(2.0));
}

// ══════════════════════════════════════════════
//  Derivatives over theta
// ══════════════════════════════════════════════

#[test]
fn value_and_gradient() {
    let va = model(VectorMode::VALUE_AND_GRAD);
    let theta = [1.0, 2.0, 3.0, 4.0, 0.5];
    let (v, g) = va.value_and_grad(&theta).unwrap();
    assert_relative_eq!(v, 30.0 * 0.5 + 0.125);

    let expected = [1.0, 2.0, 3.0, 4.0, 30.0 + 3.0 * 0.25];
    for (gi, ei) in g.iter().zip(expected) {
        assert_relative_eq!(*gi, ei, epsilon = 1e-12);
    }
    assert_relative_eq!(va.value(&theta).unwrap().as_scalar().unwrap(), v);
}

#[test]
fn hessian_vector_over_theta() {
    let va = model(VectorMode::ALL);
    let theta = [1.0, 2.0, 3.0, 4.0, 0.5];
    let b = theta[4];

    // H = [[2b I, 2w], [2w^T, 6b]]
    let dir = [1.0, 0.0, 0.0, 0.0, 1.0];
    let hv = va.hessian_vector(&theta, &dir).unwrap();
    let expected = [
        2.0 * b + 2.0 * theta[0],
        2.0 * theta[1],
        2.0 * theta[2],
        2.0 * theta[3],
        2.0 * theta[0] + 6.0 * b,
    ];
    for (h, e) in hv.iter().zip(expected) {
        assert_relative_eq!(*h, e, epsilon = 1e-12);
    }

    // value and gradient still work without a direction
    let (v, _) = va.value_and_grad(&theta).unwrap();
    assert_relative_eq!(v, 15.125);
}

#[test]
fn call_validates_inputs() {
    let va = model(VectorMode::ALL);
    assert!(matches!(
        va.call(&[1.0; 4], Some(&[0.0; 5][..])),
        Err(Error::VectorLength { expected: 5, received: 4 })
    ));
    assert!(matches!(va.call(&[1.0; 5], None), Err(Error::MissingVectors)));
    assert!(matches!(
        va.call(&[1.0; 5], Some(&[0.0; 3][..])),
        Err(Error::VectorLength { expected: 5, received: 3 })
    ));
    let outs = va.call(&[1.0; 5], Some(&[0.0; 5][..])).unwrap();
    assert_eq!(outs.len(), 3);
}

#[test]
fn unrequested_output() {
    let va = model(VectorMode::VALUE);
    assert!(matches!(va.gradient(&[1.0; 5]), Err(Error::NoOutputsRequested)));
}
