// Optimizer update rules, checked against their closed-form recurrences.

use approx::assert_relative_eq;
use seqnet::optimizers::{AdaGrad, Adam, Optimizer, SGD};

#[test]
fn test_adagrad_matches_closed_form_recurrence() {
    // acc_n = sum of g_i^2, param_n = param_{n-1} - lr * g_n / (sqrt(acc_n) + eps)
    let lr = 0.5f32;
    let eps = 0.1f32;
    let gradients = [1.0f32, -2.0, 0.5, 3.0, -0.25, 1.5, 0.75, -1.0, 2.0, 0.1];

    let mut optimizer = AdaGrad::new(lr, eps);
    let mut param = vec![2.0f32];

    let mut acc = 0.0f32;
    let mut expected = 2.0f32;
    for &g in &gradients {
        optimizer.update(0, &mut param, &[g]);
        acc += g * g;
        expected -= lr * g / (acc.sqrt() + eps);
    }

    assert_relative_eq!(param[0], expected, epsilon = 1e-5);
    assert_relative_eq!(optimizer.accumulator(0).unwrap()[0], acc, epsilon = 1e-4);
}

#[test]
fn test_adagrad_accumulator_persists_across_steps() {
    // Repeated identical gradients must give shrinking steps.
    let mut optimizer = AdaGrad::new(1.0, 1e-8);
    let mut param = vec![0.0f32];
    let mut previous = f32::INFINITY;
    for _ in 0..5 {
        let before = param[0];
        optimizer.update(0, &mut param, &[1.0]);
        let step = (param[0] - before).abs();
        assert!(step < previous);
        previous = step;
    }
}

#[test]
fn test_adagrad_reset_restores_first_step_size() {
    let mut optimizer = AdaGrad::new(1.0, 0.0);
    let mut param = vec![0.0f32];
    optimizer.update(0, &mut param, &[2.0]);
    let first_step = param[0].abs(); // lr * g / |g| = 1

    optimizer.reset();
    let mut param = vec![0.0f32];
    optimizer.update(0, &mut param, &[2.0]);
    assert_relative_eq!(param[0].abs(), first_step, epsilon = 1e-6);
}

#[test]
fn test_sgd_closed_form() {
    let mut optimizer = SGD::new(0.1);
    let mut param = vec![1.0f32];
    for _ in 0..10 {
        optimizer.update(0, &mut param, &[0.5]);
    }
    assert_relative_eq!(param[0], 1.0 - 10.0 * 0.1 * 0.5, epsilon = 1e-6);
}

#[test]
fn test_adam_constant_gradient_step_is_learning_rate() {
    // With a constant gradient, bias-corrected m_hat / sqrt(v_hat) stays at
    // g / |g|, so each step is close to the learning rate.
    let mut optimizer = Adam::new(0.01, 0.9, 0.999, 1e-8);
    let mut param = vec![5.0f32];
    let mut previous = param[0];
    for _ in 0..20 {
        optimizer.update(0, &mut param, &[3.0]);
        let step = previous - param[0];
        assert_relative_eq!(step, 0.01, epsilon = 1e-3);
        previous = param[0];
    }
}

#[test]
fn test_per_tensor_state_is_independent() {
    let mut optimizer = AdaGrad::new(1.0, 0.0);
    let mut weights = vec![0.0f32, 0.0];
    let mut biases = vec![0.0f32];

    optimizer.update(0, &mut weights, &[1.0, 2.0]);
    optimizer.update(1, &mut biases, &[4.0]);
    optimizer.update(0, &mut weights, &[1.0, 2.0]);

    // Key 1 saw one update; its accumulator is untouched by key 0's second.
    assert_relative_eq!(optimizer.accumulator(1).unwrap()[0], 16.0, epsilon = 1e-6);
    assert_relative_eq!(optimizer.accumulator(0).unwrap()[0], 2.0, epsilon = 1e-6);
}
