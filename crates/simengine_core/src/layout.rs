//! Parallel state layout.
//!
//! Every per-model flat array in the engine (states, inputs, outputs, stage
//! buffers, sampled input entries) is stored model-major: the `stride`
//! elements of model `m` occupy `m * stride .. (m + 1) * stride`. Strategies,
//! the input subsystem and the model callback all address memory through
//! [`BatchLayout`], so a model's data is found at the same place by all of
//! them, and disjoint models map to disjoint slices.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLayout {
    stride: usize,
    num_models: usize,
}

impl BatchLayout {
    pub fn new(stride: usize, num_models: usize) -> Self {
        Self { stride, num_models }
    }

    /// Elements per model.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn num_models(&self) -> usize {
        self.num_models
    }

    /// Total flat length.
    pub fn len(&self) -> usize {
        self.stride * self.num_models
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat index of `element` of `model`.
    #[inline]
    pub fn offset(&self, model: usize, element: usize) -> usize {
        debug_assert!(model < self.num_models, "model {model} out of range");
        debug_assert!(element < self.stride, "element {element} out of range");
        model * self.stride + element
    }

    /// Flat range holding `model`'s elements.
    #[inline]
    pub fn range(&self, model: usize) -> Range<usize> {
        let start = model * self.stride;
        start..start + self.stride
    }

    pub fn alloc<T: Clone>(&self, fill: T) -> Vec<T> {
        vec![fill; self.len()]
    }

    pub fn model<'a, T>(&self, data: &'a [T], model: usize) -> &'a [T] {
        &data[self.range(model)]
    }

    pub fn model_mut<'a, T>(&self, data: &'a mut [T], model: usize) -> &'a mut [T] {
        &mut data[self.range(model)]
    }

    /// Splits `data` into one disjoint mutable slice per model. A zero stride
    /// yields empty slices rather than none.
    pub fn split_mut<'a, T>(&self, data: &'a mut [T]) -> Vec<&'a mut [T]> {
        debug_assert_eq!(data.len(), self.len());
        if self.stride == 0 {
            return (0..self.num_models).map(|_| <&mut [T]>::default()).collect();
        }
        data.chunks_mut(self.stride).collect()
    }
}

/// Splits a per-model stage block into `K` consecutive vectors of length `n`.
///
/// Panics if `block` is shorter than `K * n`.
pub fn split_stages<T, const K: usize>(block: &mut [T], n: usize) -> [&mut [T]; K] {
    let mut rest = block;
    std::array::from_fn(|_| {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(n);
        rest = tail;
        head
    })
}
