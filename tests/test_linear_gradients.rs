// Numerical gradient checking for linear layers: analytical gradients from
// backward must match central finite differences of the loss.

use approx::assert_relative_eq;
use seqnet::layers::{Layer, LinearLayer};
use seqnet::network::{Network, Sequential};
use seqnet::training::{mse_gradient, mse_loss};
use seqnet::utils::SimpleRng;

const PERTURBATION: f32 = 1e-2;

fn layer_loss(layer: &LinearLayer, input: &[f32], target: &[f32]) -> f32 {
    mse_loss(&layer.evaluate(input).unwrap(), target)
}

fn network_loss(network: &Sequential, input: &[f32], target: &[f32]) -> f32 {
    mse_loss(&network.evaluate(input).unwrap(), target)
}

#[test]
fn test_linear_weight_gradients_match_finite_differences() {
    let mut rng = SimpleRng::new(7);
    let mut layer = LinearLayer::new(4, 3, &mut rng);
    let input = [0.8, -0.4, 0.2, 1.1];
    let target = [0.5, -0.25, 0.75];

    let output = layer.forward(&input).unwrap();
    layer.backward(&mse_gradient(&output, &target)).unwrap();
    let analytical = layer.drain_gradients();

    for tensor in 0..2 {
        let len = layer.parameters_mut()[tensor].len();
        for i in 0..len {
            layer.parameters_mut()[tensor][i] += PERTURBATION;
            let loss_plus = layer_loss(&layer, &input, &target);
            layer.parameters_mut()[tensor][i] -= 2.0 * PERTURBATION;
            let loss_minus = layer_loss(&layer, &input, &target);
            layer.parameters_mut()[tensor][i] += PERTURBATION;

            let numerical = (loss_plus - loss_minus) / (2.0 * PERTURBATION);
            assert_relative_eq!(
                analytical[tensor][i],
                numerical,
                epsilon = 1e-3,
                max_relative = 2e-2
            );
        }
    }
}

#[test]
fn test_linear_input_gradient_matches_finite_differences() {
    let mut rng = SimpleRng::new(13);
    let mut layer = LinearLayer::new(3, 2, &mut rng);
    let mut input = vec![0.3, -0.9, 0.6];
    let target = [1.0, -1.0];

    let output = layer.forward(&input).unwrap();
    let grad_input = layer.backward(&mse_gradient(&output, &target)).unwrap();

    for i in 0..input.len() {
        input[i] += PERTURBATION;
        let loss_plus = layer_loss(&layer, &input, &target);
        input[i] -= 2.0 * PERTURBATION;
        let loss_minus = layer_loss(&layer, &input, &target);
        input[i] += PERTURBATION;

        let numerical = (loss_plus - loss_minus) / (2.0 * PERTURBATION);
        assert_relative_eq!(grad_input[i], numerical, epsilon = 1e-3, max_relative = 2e-2);
    }
}

#[test]
fn test_network_gradients_through_relu_match_finite_differences() {
    let mut rng = SimpleRng::new(29);
    let mut network = Sequential::initialize(
        2,
        vec![
            Layer::linear(2, 5, &mut rng),
            Layer::relu(),
            Layer::linear(5, 1, &mut rng),
        ],
    )
    .unwrap();
    let input = [0.7, -0.3];
    let target = [0.25];

    // Fixed weights keep every hidden pre-activation at least 0.05 away
    // from the Relu kink, so no finite difference straddles the corner.
    let fixed: [&[f32]; 4] = [
        &[0.6, 0.4, 0.5, -0.3, -0.7, 0.2, 0.8, 0.1, -0.4, -0.6],
        &[0.3, 0.2, 0.1, 0.25, 0.15],
        &[0.5, -0.6, 0.3, 0.4, -0.2],
        &[0.1],
    ];
    for (tensor, values) in network.parameters_mut().into_iter().zip(fixed) {
        tensor.copy_from_slice(values);
    }

    let output = network.forward(&input).unwrap();
    network.backward(&mse_gradient(&output, &target)).unwrap();
    let analytical = network.drain_gradients();

    let tensor_count = network.parameters_mut().len();
    for tensor in 0..tensor_count {
        let len = network.parameters_mut()[tensor].len();
        for i in 0..len {
            network.parameters_mut()[tensor][i] += PERTURBATION;
            let loss_plus = network_loss(&network, &input, &target);
            network.parameters_mut()[tensor][i] -= 2.0 * PERTURBATION;
            let loss_minus = network_loss(&network, &input, &target);
            network.parameters_mut()[tensor][i] += PERTURBATION;

            let numerical = (loss_plus - loss_minus) / (2.0 * PERTURBATION);
            assert_relative_eq!(
                analytical[tensor][i],
                numerical,
                epsilon = 2e-3,
                max_relative = 3e-2
            );
        }
    }
}
