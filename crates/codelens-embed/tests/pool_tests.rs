use candle_core::{Device, Tensor};
use codelens_embed::masked_mean_l2;

fn unit(v: &[f32]) -> Vec<f32> {
    let n = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / n).collect()
}

#[test]
fn padding_tokens_do_not_move_the_mean() {
    let dev = Device::Cpu;
    // row 0 is one real token plus padding, row 1 averages two real tokens
    let hidden = Tensor::from_slice(
        &[3.0f32, 0.0, 4.0, 9.0, 9.0, 9.0, 1.0, 2.0, 2.0, 3.0, 2.0, 0.0],
        (2, 2, 3),
        &dev,
    )
    .unwrap();
    let mask = Tensor::from_slice(&[1.0f32, 0.0, 1.0, 1.0], (2, 2), &dev).unwrap();
    let rows: Vec<Vec<f32>> = masked_mean_l2(&hidden, &mask).unwrap().to_vec2().unwrap();

    for (got, want) in rows[0].iter().zip(unit(&[3.0, 0.0, 4.0])) {
        assert!((got - want).abs() < 1e-5);
    }
    for (got, want) in rows[1].iter().zip(unit(&[2.0, 2.0, 1.0])) {
        assert!((got - want).abs() < 1e-5);
    }
}

#[test]
fn pooled_rows_have_unit_length() {
    let dev = Device::Cpu;
    let hidden = Tensor::from_slice(&[0.5f32, -1.5, 2.0, 7.0, 0.25, -3.0], (1, 3, 2), &dev).unwrap();
    let mask = Tensor::from_slice(&[1u32, 1, 1], (1, 3), &dev).unwrap();
    let rows: Vec<Vec<f32>> = masked_mean_l2(&hidden, &mask).unwrap().to_vec2().unwrap();
    let norm = rows[0].iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
}

#[test]
fn two_dimensional_hidden_state_is_rejected() {
    let dev = Device::Cpu;
    let hidden = Tensor::from_slice(&[1.0f32, 2.0], (1, 2), &dev).unwrap();
    let mask = Tensor::from_slice(&[1.0f32], (1, 1), &dev).unwrap();
    assert!(masked_mean_l2(&hidden, &mask).is_err());
}
