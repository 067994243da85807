use fusegraph::approx::all_close;
use fusegraph::config::{DeviceConfig, EngineConfig};
use fusegraph::device::Devices;
use fusegraph::ops::UnaryFn;
use fusegraph::params::Parameter;
use fusegraph::pool::PoolKind;
use fusegraph::{Dim, ExecError, ExecutionEngine, Graph, Tensor, VariableIndex, tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const UNARY: [UnaryFn; 9] = [
    UnaryFn::Tanh,
    UnaryFn::Rectify,
    UnaryFn::Sigmoid,
    UnaryFn::Erf,
    UnaryFn::Sqrt,
    UnaryFn::Exp,
    UnaryFn::LogGamma,
    UnaryFn::Log,
    UnaryFn::Negate,
];

fn engine(config: EngineConfig) -> ExecutionEngine {
    ExecutionEngine::new(Devices::single(DeviceConfig::default()), config)
}

fn random_tensor(rng: &mut StdRng, dims: &[usize], lo: f32, hi: f32) -> Tensor {
    let dim = Dim::new(dims);
    Tensor::new(dim, (0..dim.size()).map(|_| rng.random_range(lo..hi)).collect())
}

fn values(e: &mut ExecutionEngine, g: &Graph, nodes: &[VariableIndex]) -> Vec<Vec<f32>> {
    nodes.iter().map(|&i| e.get_value(g, i).unwrap().data.to_vec()).collect()
}

#[test]
fn twelve_tanh_nodes_run_as_one_call() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut g = Graph::new();
    let inputs: Vec<VariableIndex> = (0..12)
        .map(|_| g.input(random_tensor(&mut rng, &[4], -2.0, 2.0)).unwrap())
        .collect();
    let outputs: Vec<VariableIndex> = inputs.iter().map(|&x| g.tanh(x).unwrap()).collect();

    let mut e = ExecutionEngine::cpu();
    e.forward_all(&g).unwrap();
    let stats = e.stats();
    assert_eq!(stats.fused_unary_groups, 1);
    assert_eq!(stats.nodes_dispatched, 24);
    // twelve inputs one by one, the tanh group once
    assert_eq!(stats.kernel_calls, 13);

    for (&x, &y) in inputs.iter().zip(&outputs) {
        let expected: Vec<f32> = e.get_value(&g, x).unwrap().data.iter().map(|v| v.tanh()).collect();
        assert!(all_close(e.get_value(&g, y).unwrap().data, &expected), "node {y}");
    }
}

#[test]
fn small_groups_are_not_fused() {
    let mut g = Graph::new();
    for _ in 0..10 {
        let x = g.input(tensor!([1.0, 2.0])).unwrap();
        g.tanh(x).unwrap();
    }
    let mut e = ExecutionEngine::cpu();
    e.forward_all(&g).unwrap();
    assert_eq!(e.stats().fused_unary_groups, 0);
    assert_eq!(e.stats().kernel_calls, 20);
}

#[test]
fn fused_unary_matches_unfused_for_every_function() {
    let mut rng = StdRng::seed_from_u64(9);
    for f in UNARY {
        let mut g = Graph::new();
        let outputs: Vec<VariableIndex> = (0..11)
            .map(|i| {
                // mixed sizes, positive so that log, sqrt and lgamma are defined
                let x = g.input(random_tensor(&mut rng, &[1 + i % 3, 2], 0.1, 3.0)).unwrap();
                g.unary(f, x).unwrap()
            })
            .collect();

        let mut fused = engine(EngineConfig::default());
        let mut plain = engine(EngineConfig::default().with_fusion(false));
        fused.forward_all(&g).unwrap();
        plain.forward_all(&g).unwrap();
        assert_eq!(fused.stats().fused_unary_groups, 1, "{f:?}");
        assert_eq!(plain.stats().fused_unary_groups, 0, "{f:?}");
        assert_eq!(values(&mut fused, &g, &outputs), values(&mut plain, &g, &outputs), "{f:?}");
    }
}

#[test]
fn fusion_temporaries_are_released() {
    let mut g = Graph::new();
    for _ in 0..16 {
        let x = g.input(tensor!([1.0, 2.0, 3.0])).unwrap();
        g.exp(x).unwrap();
    }
    let mut fused = ExecutionEngine::cpu();
    let mut plain = engine(EngineConfig::default().with_fusion(false));
    fused.forward_all(&g).unwrap();
    plain.forward_all(&g).unwrap();

    let pool = |e: &ExecutionEngine| e.devices().iter().next().unwrap().pool(PoolKind::Values).stats();
    assert_eq!(pool(&fused).used, pool(&plain).used);
    assert!(pool(&fused).high_water > pool(&fused).used);
    assert_eq!(pool(&plain).high_water, pool(&plain).used);
}

/// Ten products of one weight with separate vectors, two with another weight,
/// and two matrix-by-matrix products that cannot be packed.
fn shared_weight_graph(rng: &mut StdRng) -> (Graph, Vec<VariableIndex>, Vec<Parameter>) {
    let w = Parameter::new(random_tensor(rng, &[3, 4], -1.0, 1.0));
    let v = Parameter::new(random_tensor(rng, &[3, 4], -1.0, 1.0));
    let mut g = Graph::new();
    let pw = g.parameter(&w).unwrap();
    let pv = g.parameter(&v).unwrap();
    let mut products = Vec::new();
    for i in 0..12 {
        let x = g.input(random_tensor(rng, &[4], -1.0, 1.0)).unwrap();
        let weight = if i < 10 { pw } else { pv };
        products.push(g.matmul(weight, x).unwrap());
    }
    for _ in 0..2 {
        let m = g.input(random_tensor(rng, &[4, 2], -1.0, 1.0)).unwrap();
        products.push(g.matmul(pw, m).unwrap());
    }
    (g, products, vec![w, v])
}

#[test]
fn shared_weight_products_are_packed() {
    let mut rng = StdRng::seed_from_u64(21);
    let (g, products, _) = shared_weight_graph(&mut rng);

    let mut fused = ExecutionEngine::cpu();
    let mut plain = engine(EngineConfig::default().with_fusion(false));
    fused.forward_all(&g).unwrap();
    plain.forward_all(&g).unwrap();

    assert_eq!(fused.stats().fused_matmul_groups, 2);
    assert_eq!(plain.stats().fused_matmul_groups, 0);
    for (a, b) in values(&mut fused, &g, &products).iter().zip(values(&mut plain, &g, &products)) {
        assert!(all_close(a, &b));
    }
}

#[test]
fn packed_products_match_manual_multiplication() {
    let mut rng = StdRng::seed_from_u64(4);
    let (g, products, params) = shared_weight_graph(&mut rng);
    let mut e = ExecutionEngine::cpu();
    e.forward_all(&g).unwrap();

    let w = params[0].value();
    let x_node = g.node(products[0]).unwrap().args()[1];
    let x = e.value_tensor(&g, x_node).unwrap();
    let expected: Vec<f32> = (0..3)
        .map(|r| (0..4).map(|c| w.view().at(r, c) * x.data[c]).sum())
        .collect();
    assert!(all_close(e.get_value(&g, products[0]).unwrap().data, &expected));
}

#[test]
fn parallel_dispatch_matches_serial() {
    let mut rng = StdRng::seed_from_u64(77);
    let (mut g, products, _) = shared_weight_graph(&mut rng);
    let activated: Vec<VariableIndex> = products.iter().map(|&p| g.sigmoid(p).unwrap()).collect();
    let total = g.add_all(&activated[..12]).unwrap();
    let loss = g.sum_elements(total).unwrap();

    let mut serial = ExecutionEngine::cpu();
    let mut parallel = engine(EngineConfig::default().with_parallel(true).with_fusion(false));
    let a = serial.forward(&g, loss).unwrap().as_scalar();
    let b = parallel.forward(&g, loss).unwrap().as_scalar();
    assert!((a - b).abs() < 1e-4);
    assert_eq!(parallel.stats().nodes_dispatched, g.len() as u64);
}

#[test]
fn gradients_agree_with_and_without_fusion() {
    let mut rng = StdRng::seed_from_u64(8);
    let grads = |config: EngineConfig, rng: &mut StdRng| {
        let (mut g, products, params) = shared_weight_graph(rng);
        let activated: Vec<VariableIndex> = products[..12].iter().map(|&p| g.tanh(p).unwrap()).collect();
        let total = g.add_all(&activated).unwrap();
        let loss = g.sum_elements(total).unwrap();
        let mut e = engine(config);
        e.backward(&g, loss).unwrap();
        params.iter().map(|p| p.grad().data).collect::<Vec<_>>()
    };
    let fused = grads(EngineConfig::default(), &mut rng.clone());
    let plain = grads(EngineConfig::default().with_fusion(false), &mut rng);
    for (a, b) in fused.iter().zip(&plain) {
        assert!(all_close(a, b));
    }
}

/// `n` products of random vectors of length `len`, each with a weight from `weights`.
fn products(rng: &mut StdRng, weights: &[Parameter], n: usize, len: usize) -> (Graph, Vec<VariableIndex>) {
    let mut g = Graph::new();
    let ws: Vec<VariableIndex> = weights.iter().map(|w| g.parameter(w).unwrap()).collect();
    let xs: Vec<VariableIndex> = (0..n)
        .map(|_| g.input(random_tensor(rng, &[len], -1.0, 1.0)).unwrap())
        .collect();
    let ys = xs
        .iter()
        .enumerate()
        .map(|(i, &x)| g.matmul(ws[i % ws.len()], x).unwrap())
        .collect();
    (g, ys)
}

#[test]
fn matmul_groups_at_the_threshold_run_individually() {
    let mut rng = StdRng::seed_from_u64(31);
    let w = Parameter::new(random_tensor(&mut rng, &[3, 4], -1.0, 1.0));
    let (g, ys) = products(&mut rng, &[w], 5, 4);

    let mut fused = ExecutionEngine::cpu();
    let mut plain = engine(EngineConfig::default().with_fusion(false));
    fused.forward_all(&g).unwrap();
    plain.forward_all(&g).unwrap();

    let stats = fused.stats();
    assert_eq!(stats.fused_matmul_groups, 0);
    // one call per node: the weight, five vectors and five products
    assert_eq!(stats.kernel_calls, 11);
    assert_eq!(stats.nodes_dispatched, 11);
    assert_eq!(values(&mut fused, &g, &ys), values(&mut plain, &g, &ys));
}

#[test]
fn products_with_distinct_weights_are_not_packed() {
    let mut rng = StdRng::seed_from_u64(32);
    let weights: Vec<Parameter> = (0..6)
        .map(|_| Parameter::new(random_tensor(&mut rng, &[3, 4], -1.0, 1.0)))
        .collect();
    let (g, ys) = products(&mut rng, &weights, 6, 4);

    let mut fused = ExecutionEngine::cpu();
    let mut plain = engine(EngineConfig::default().with_fusion(false));
    fused.forward_all(&g).unwrap();
    plain.forward_all(&g).unwrap();

    assert_eq!(fused.stats().fused_matmul_groups, 0);
    assert_eq!(fused.stats().kernel_calls, g.len() as u64);
    assert_eq!(values(&mut fused, &g, &ys), values(&mut plain, &g, &ys));
}

#[test]
fn packed_vectors_must_match_the_weight() {
    let mut rng = StdRng::seed_from_u64(33);
    let w = Parameter::new(random_tensor(&mut rng, &[3, 4], -1.0, 1.0));
    let (g, ys) = products(&mut rng, &[w], 6, 5);

    let mut e = ExecutionEngine::cpu();
    assert_eq!(
        e.forward_all(&g).unwrap_err(),
        ExecError::FusionShape { node: ys[0], weight: 0, expected: 4, found: 5 }
    );
    assert_eq!(e.evaluated(), 0);
}
