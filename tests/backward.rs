use fusegraph::approx::max_abs_diff;
use fusegraph::ops::InputValue;
use fusegraph::params::{Parameter, sgd};
use fusegraph::{Dim, ExecError, ExecutionEngine, Graph, Tensor, tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn diamond_gradients_add_up() {
    let p = Parameter::new(tensor!([3.0]));
    let mut g = Graph::new();
    let x = g.parameter(&p).unwrap();
    let left = g.scale(x, 2.0).unwrap();
    let right = g.scale(x, 3.0).unwrap();
    let s = g.add_all(&[left, right]).unwrap();

    let mut e = ExecutionEngine::cpu();
    assert_eq!(e.forward(&g, s).unwrap().as_scalar(), 15.0);
    e.backward(&g, s).unwrap();
    assert_eq!(e.gradient(x).unwrap().as_scalar(), 5.0);
    assert_eq!(p.grad().data, vec![5.0]);

    // a second pass adds to the persistent gradient
    e.backward(&g, s).unwrap();
    assert_eq!(p.grad().data, vec![10.0]);
}

#[test]
fn backward_evaluates_lazily() {
    let p = Parameter::new(tensor!([2.0]));
    let mut g = Graph::new();
    let x = g.parameter(&p).unwrap();
    let y = g.exp(x).unwrap();
    let mut e = ExecutionEngine::cpu();
    e.backward(&g, y).unwrap();
    assert_eq!(e.evaluated(), 2);
    assert!((p.grad().as_scalar() - 2.0f32.exp()).abs() < 1e-4);
}

#[test]
fn non_scalar_target_is_rejected() {
    let p = Parameter::new(tensor!([1.0, 2.0]));
    let mut g = Graph::new();
    let x = g.parameter(&p).unwrap();
    let y = g.tanh(x).unwrap();
    let mut e = ExecutionEngine::cpu();
    assert_eq!(
        e.backward(&g, y).unwrap_err(),
        ExecError::NonScalarTarget { index: y, dim: Dim::new(&[2]) }
    );
    assert_eq!(p.grad().data, vec![0.0, 0.0]);
    // the forward values are still cached
    assert_eq!(e.evaluated(), 2);
}

#[test]
fn parameters_past_the_target_keep_their_gradient() {
    let a = Parameter::new(tensor!([1.0]));
    let b = Parameter::new(tensor!([1.0]));
    let mut g = Graph::new();
    let pa = g.parameter(&a).unwrap();
    let first = g.scale(pa, 4.0).unwrap();
    let pb = g.parameter(&b).unwrap();
    g.add_all(&[first, pb]).unwrap();

    let mut e = ExecutionEngine::cpu();
    e.backward(&g, first).unwrap();
    assert_eq!(a.grad().data, vec![4.0]);
    assert_eq!(b.grad().data, vec![0.0]);
}

#[test]
fn unused_parameters_get_no_gradient() {
    let used = Parameter::new(tensor!([1.0]));
    let unused = Parameter::new(tensor!([1.0]));
    let mut g = Graph::new();
    let pu = g.parameter(&used).unwrap();
    let pn = g.parameter(&unused).unwrap();
    g.tanh(pn).unwrap();
    let y = g.scale(pu, -1.0).unwrap();

    let mut e = ExecutionEngine::cpu();
    e.backward_all(&g).unwrap();
    assert_eq!(used.grad().data, vec![-1.0]);
    assert_eq!(unused.grad().data, vec![0.0]);
    assert!(e.gradient(y).is_some());
}

#[test]
fn gradients_match_finite_differences() {
    let mut rng = StdRng::seed_from_u64(17);
    let mut random = |dims: &[usize]| {
        let dim = Dim::new(dims);
        Tensor::new(dim, (0..dim.size()).map(|_| rng.random_range(-1.0..1.0)).collect())
    };
    let w = Parameter::new(random(&[3, 4]));
    let b = Parameter::new(random(&[3]));
    let x = random(&[4]);
    let t = random(&[3]);

    let mut g = Graph::new();
    let pw = g.parameter(&w).unwrap();
    let pb = g.parameter(&b).unwrap();
    let px = g.input(x).unwrap();
    let wx = g.matmul(pw, px).unwrap();
    let h = g.add_all(&[wx, pb]).unwrap();
    let y = g.tanh(h).unwrap();
    let target = g.input(t).unwrap();
    let loss = g.squared_distance(y, target).unwrap();

    let mut e = ExecutionEngine::cpu();
    e.backward(&g, loss).unwrap();
    let analytic = w.grad().data;

    let eps = 1e-2;
    let original = w.value();
    let mut numeric = Vec::new();
    for i in 0..original.data.len() {
        let mut loss_at = |delta: f32| {
            let mut shifted = original.clone();
            shifted.data[i] += delta;
            w.set_value(shifted);
            e.forward(&g, loss).unwrap().as_scalar()
        };
        numeric.push((loss_at(eps) - loss_at(-eps)) / (2.0 * eps));
    }
    w.set_value(original);
    assert!(max_abs_diff(&analytic, &numeric) < 1e-2, "{analytic:?} vs {numeric:?}");
}

#[test]
fn xor_training_reduces_loss() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut init = |dims: &[usize]| {
        let dim = Dim::new(dims);
        Tensor::new(dim, (0..dim.size()).map(|_| rng.random_range(-1.0..1.0)).collect())
    };
    let w1 = Parameter::new(init(&[8, 2]));
    let b1 = Parameter::new(init(&[8]));
    let w2 = Parameter::new(init(&[1, 8]));
    let params = [&w1, &b1, &w2];

    let inputs = InputValue::new(Tensor::new(Dim::batched(&[2], 4), vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0]));
    let targets = InputValue::new(Tensor::new(Dim::batched(&[1], 4), vec![0.0, 1.0, 1.0, 0.0]));

    let mut g = Graph::new();
    let x = g.input_value(&inputs).unwrap();
    let t = g.input_value(&targets).unwrap();
    let pw1 = g.parameter(&w1).unwrap();
    let pb1 = g.parameter(&b1).unwrap();
    let pw2 = g.parameter(&w2).unwrap();
    let z = g.matmul(pw1, x).unwrap();
    let z = g.add_all(&[z, pb1]).unwrap();
    let h = g.tanh(z).unwrap();
    let y = g.matmul(pw2, h).unwrap();
    let err = g.squared_distance(y, t).unwrap();
    let loss = g.sum_batches(err).unwrap();

    let mut e = ExecutionEngine::cpu();
    let initial = e.forward(&g, loss).unwrap().as_scalar();
    let mut last = initial;
    for _ in 0..300 {
        last = e.forward(&g, loss).unwrap().as_scalar();
        e.backward(&g, loss).unwrap();
        for p in params {
            sgd(p, 0.05);
        }
    }
    assert!(last.is_finite());
    assert!(last < initial, "loss went from {initial} to {last}");
}
