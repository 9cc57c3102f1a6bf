use ndarray::{Array1, Array2, ArrayView2, Axis, linalg::general_mat_mul};

use crate::arch::LayerKind;

const NORM_EPS: f32 = 1e-5;

/// What flows between layers: token ids into the embedding, hidden states everywhere else.
#[derive(Debug, Clone)]
pub(super) enum Signal {
    Tokens(Array2<u32>),
    Hidden(Array2<f32>),
}

#[derive(Debug)]
pub(super) struct NormCache {
    x_hat: Array2<f32>,
    inv_std: Array1<f32>,
}

/// Forward metadata a layer needs to run its backward pass.
#[derive(Debug)]
pub(super) enum Cache {
    Embedding { ids: Array2<u32> },
    Block { norm: NormCache, h: Array2<f32>, a: Array2<f32> },
    LayerNorm(NormCache),
    Head { x: Array2<f32> },
}

/// Runs a layer of kind `kind` over `input`.
///
/// Hidden states are shaped `(rows × seq_len, dim)`, one row per token.
///
/// # Returns
/// The layer's output and the cache for its backward pass, or the reason it failed.
pub(super) fn forward(
    kind: LayerKind,
    params: &[Array2<f32>],
    input: Signal,
) -> Result<(Signal, Cache), String> {
    match (kind, params, input) {
        (LayerKind::Embedding, [tok, pos], Signal::Tokens(ids)) => {
            let x = embed(&ids, tok, pos)?;
            Ok((Signal::Hidden(x), Cache::Embedding { ids }))
        }
        (LayerKind::Block, [gain, bias, w, b], Signal::Hidden(x)) => {
            let (h, norm) = layer_norm(&x, gain, bias);
            let a = linear(&h, w, b).mapv_into(f32::tanh);
            let y = x + &a;
            Ok((Signal::Hidden(y), Cache::Block { norm, h, a }))
        }
        (LayerKind::LayerNorm, [gain, bias], Signal::Hidden(x)) => {
            let (y, norm) = layer_norm(&x, gain, bias);
            Ok((Signal::Hidden(y), Cache::LayerNorm(norm)))
        }
        (LayerKind::Head, [w, b], Signal::Hidden(x)) => {
            let logits = linear(&x, w, b);
            Ok((Signal::Hidden(logits), Cache::Head { x }))
        }
        (kind, params, input) => {
            let input = match input {
                Signal::Tokens(_) => "token ids",
                Signal::Hidden(_) => "hidden states",
            };
            Err(format!(
                "{kind:?} layer can't run on {} tensors and {input}",
                params.len()
            ))
        }
    }
}

/// Backpropagates `dy` through the layer that produced `cache`, adding its parameter
/// gradients into `grads`.
///
/// # Returns
/// The gradient with respect to the layer's input, `None` for the embedding.
pub(super) fn backward(
    params: &[Array2<f32>],
    grads: &mut [Array2<f32>],
    cache: Cache,
    dy: Array2<f32>,
) -> Result<Option<Array2<f32>>, String> {
    match (cache, params, grads) {
        (Cache::Embedding { ids }, _, [dtok, dpos]) => {
            embed_backward(&ids, &dy, dtok, dpos);
            Ok(None)
        }
        (Cache::Block { norm, h, a }, [gain, _, w, _], [dgain, dbias, dw, db]) => {
            let dz = &dy * &a.mapv(|a| 1. - a * a);
            let dh = linear_backward(&h, w, &dz, dw, db);
            let dx = layer_norm_backward(&dh, gain, &norm, dgain, dbias) + &dy;
            Ok(Some(dx))
        }
        (Cache::LayerNorm(norm), [gain, _], [dgain, dbias]) => {
            Ok(Some(layer_norm_backward(&dy, gain, &norm, dgain, dbias)))
        }
        (Cache::Head { x }, [w, _], [dw, db]) => Ok(Some(linear_backward(&x, w, &dy, dw, db))),
        (_, params, grads) => Err(format!(
            "backward pass got {} parameters and {} gradients for the cached layer",
            params.len(),
            grads.len()
        )),
    }
}

/// Mean softmax cross-entropy of `logits` against `labels`.
///
/// # Returns
/// The loss and its gradient with respect to `logits`.
pub(super) fn cross_entropy(
    logits: &Array2<f32>,
    labels: ArrayView2<u32>,
) -> Result<(f32, Array2<f32>), String> {
    let n = logits.nrows();
    if labels.len() != n {
        return Err(format!("{} labels for {n} predicted tokens", labels.len()));
    }

    let vocab = logits.ncols();
    let mut grad = logits.clone();
    let mut loss = 0.;

    for (mut row, &label) in grad.rows_mut().into_iter().zip(labels.iter()) {
        let label = label as usize;
        if label >= vocab {
            return Err(format!("label {label} is outside the {vocab}-token vocabulary"));
        }

        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let target = row[label];
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();

        loss += sum.ln() + max - target;
        row /= sum;
        row[label] -= 1.;
    }

    let n = n as f32;
    grad /= n;
    Ok((loss / n, grad))
}

fn embed(ids: &Array2<u32>, tok: &Array2<f32>, pos: &Array2<f32>) -> Result<Array2<f32>, String> {
    let (rows, seq_len) = ids.dim();
    if seq_len > pos.nrows() {
        return Err(format!(
            "sequence of {seq_len} tokens exceeds the {} learned positions",
            pos.nrows()
        ));
    }

    let mut x = Array2::zeros((rows * seq_len, tok.ncols()));

    for ((r, t), &id) in ids.indexed_iter() {
        let id = id as usize;
        if id >= tok.nrows() {
            return Err(format!(
                "token id {id} is outside the {}-token vocabulary",
                tok.nrows()
            ));
        }

        let mut row = x.row_mut(r * seq_len + t);
        row.assign(&tok.row(id));
        row += &pos.row(t);
    }

    Ok(x)
}

fn embed_backward(ids: &Array2<u32>, dy: &Array2<f32>, dtok: &mut Array2<f32>, dpos: &mut Array2<f32>) {
    let seq_len = ids.ncols();

    for ((r, t), &id) in ids.indexed_iter() {
        let g = dy.row(r * seq_len + t);
        let mut tok_row = dtok.row_mut(id as usize);
        tok_row += &g;
        let mut pos_row = dpos.row_mut(t);
        pos_row += &g;
    }
}

fn linear(x: &Array2<f32>, w: &Array2<f32>, b: &Array2<f32>) -> Array2<f32> {
    x.dot(w) + b
}

fn linear_backward(
    x: &Array2<f32>,
    w: &Array2<f32>,
    dz: &Array2<f32>,
    dw: &mut Array2<f32>,
    db: &mut Array2<f32>,
) -> Array2<f32> {
    general_mat_mul(1., &x.t(), dz, 1., dw);
    *db += &dz.sum_axis(Axis(0)).insert_axis(Axis(0));
    dz.dot(&w.t())
}

fn layer_norm(x: &Array2<f32>, gain: &Array2<f32>, bias: &Array2<f32>) -> (Array2<f32>, NormCache) {
    let d = x.ncols() as f32;

    let mean = (x.sum_axis(Axis(1)) / d).insert_axis(Axis(1));
    let centered = x - &mean;
    let var = centered.mapv(|c| c * c).sum_axis(Axis(1)) / d;
    let inv_std = var.mapv(|v| 1. / (v + NORM_EPS).sqrt());

    let x_hat = centered * &inv_std.view().insert_axis(Axis(1));
    let y = &x_hat * gain + bias;

    (y, NormCache { x_hat, inv_std })
}

fn layer_norm_backward(
    dy: &Array2<f32>,
    gain: &Array2<f32>,
    cache: &NormCache,
    dgain: &mut Array2<f32>,
    dbias: &mut Array2<f32>,
) -> Array2<f32> {
    let NormCache { x_hat, inv_std } = cache;
    let d = dy.ncols() as f32;

    *dgain += &(dy * x_hat).sum_axis(Axis(0)).insert_axis(Axis(0));
    *dbias += &dy.sum_axis(Axis(0)).insert_axis(Axis(0));

    let dx_hat = dy * gain;
    let sum = dx_hat.sum_axis(Axis(1)).insert_axis(Axis(1));
    let dot = (&dx_hat * x_hat).sum_axis(Axis(1)).insert_axis(Axis(1));

    (dx_hat * d - &sum - x_hat * &dot) * &inv_std.view().insert_axis(Axis(1)) / d
}
