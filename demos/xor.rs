use fusegraph::ops::InputValue;
use fusegraph::params::{Parameter, sgd};
use fusegraph::{Dim, ExecutionEngine, Graph, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn main() {
    // how many noisy copies of the four XOR points go into one step?
    const COPIES: usize = 2;
    // how much noise should be applied to the input?
    const NOISE: f32 = 0.1;

    let base_inputs = [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
    let base_targets = [0.0, 1.0, 1.0, 0.0];

    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let mut init = |dims: &[usize]| {
        let dim = Dim::new(dims);
        Tensor::new(dim, (0..dim.size()).map(|_| rng.random_range(-1.0..1.0)).collect())
    };

    // model: 2 → 8 → 1
    let w1 = Parameter::new(init(&[8, 2]));
    let b1 = Parameter::new(init(&[8]));
    let w2 = Parameter::new(init(&[1, 8]));
    let b2 = Parameter::new(init(&[1]));

    // one node chain per sample; the products with w1 and w2 share a weight
    // and a rank, so the engine packs each set into a single multiply
    let mut g = Graph::new();
    let pw1 = g.parameter(&w1).unwrap();
    let pb1 = g.parameter(&b1).unwrap();
    let pw2 = g.parameter(&w2).unwrap();
    let pb2 = g.parameter(&b2).unwrap();

    let mut samples = Vec::new();
    let mut losses = Vec::new();
    for i in 0..base_inputs.len() * COPIES {
        let x = InputValue::new(Tensor::new(Dim::new(&[2]), vec![0.0; 2]));
        let t = InputValue::new(Tensor::scalar(base_targets[i % 4]));
        let px = g.input_value(&x).unwrap();
        let pt = g.input_value(&t).unwrap();
        let z1 = g.matmul(pw1, px).unwrap();
        let z1 = g.add_all(&[z1, pb1]).unwrap();
        let a1 = g.tanh(z1).unwrap();
        let z2 = g.matmul(pw2, a1).unwrap();
        let y = g.add_all(&[z2, pb2]).unwrap();
        losses.push(g.squared_distance(y, pt).unwrap());
        samples.push((x, y));
    }
    let total = g.add_all(&losses).unwrap();
    let loss = g.scale(total, 1.0 / samples.len() as f32).unwrap();

    let mut engine = ExecutionEngine::cpu();
    let lr = 0.1;
    for epoch in 0..2000 {
        for (i, (x, _)) in samples.iter().enumerate() {
            let [a, b] = base_inputs[i % 4];
            let noisy = vec![a + rng.random_range(-NOISE..NOISE), b + rng.random_range(-NOISE..NOISE)];
            x.set(Tensor::new(Dim::new(&[2]), noisy));
        }

        let value = engine.forward(&g, loss).unwrap().as_scalar();
        engine.backward(&g, loss).unwrap();
        for p in [&w1, &b1, &w2, &b2] {
            sgd(p, lr);
        }

        if epoch % 200 == 0 {
            let correct = samples
                .iter()
                .enumerate()
                .filter(|(i, (_, y))| {
                    let pred = engine.get_value(&g, *y).map(|v| v.as_scalar()).unwrap_or(f32::NAN);
                    (pred >= 0.5) == (base_targets[i % 4] == 1.0)
                })
                .count();
            println!("epoch {epoch:4}: loss = {value:.5}, accuracy = {correct}/{}", samples.len());
        }
    }

    let stats = engine.stats();
    println!(
        "{} kernel calls for {} nodes, {} fused matmul groups",
        stats.kernel_calls, stats.nodes_dispatched, stats.fused_matmul_groups
    );
}
