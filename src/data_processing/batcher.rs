// This module defines the training and inference batches of the topic
// classifier and the batcher that builds them. Sequences are right-padded with
// the padding id to the longest sequence of the batch (never shorter than the
// widest convolution kernel), and a mask marks the real tokens.

use super::dataset::TopicItem;
use super::vocabulary::PAD_ID;
use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, Bool, Int, Tensor, TensorData},
};
use derive_new::new;

/// Padded token ids and mask of one batch, before conversion to tensors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collated {
    pub batch_size: usize,
    pub seq_length: usize,
    pub tokens: Vec<usize>, // Row-major [batch_size, seq_length]
    pub mask: Vec<bool>,    // true for real tokens
}

impl Collated {
    pub fn row(&self, index: usize) -> &[usize] {
        &self.tokens[index * self.seq_length..(index + 1) * self.seq_length]
    }

    pub fn mask_row(&self, index: usize) -> &[bool] {
        &self.mask[index * self.seq_length..(index + 1) * self.seq_length]
    }
}

/// Pads `sequences` to their maximum length, or to `min_length` if that is larger.
pub fn collate<S: AsRef<[usize]>>(sequences: &[S], min_length: usize) -> Collated {
    let seq_length = sequences
        .iter()
        .map(|sequence| sequence.as_ref().len())
        .max()
        .unwrap_or(0)
        .max(min_length);

    let mut tokens = vec![PAD_ID; sequences.len() * seq_length];
    let mut mask = vec![false; sequences.len() * seq_length];
    for (i, sequence) in sequences.iter().enumerate() {
        let sequence = sequence.as_ref();
        let start = i * seq_length;
        tokens[start..start + sequence.len()].copy_from_slice(sequence);
        mask[start..start + sequence.len()].fill(true);
    }

    Collated {
        batch_size: sequences.len(),
        seq_length,
        tokens,
        mask,
    }
}

/// Batcher for topic classification examples.
#[derive(new, Clone, Debug)]
pub struct TopicBatcher<B: Backend> {
    device: B::Device,     // Device the tensors are created on
    min_seq_length: usize, // Narrowest sequence the model accepts
}

/// Training batch.
#[derive(Debug, Clone, new)]
pub struct TopicTrainingBatch<B: Backend> {
    pub tokens: Tensor<B, 2, Int>, // Padded token ids
    pub labels: Tensor<B, 1, Int>, // Label ids
    pub mask: Tensor<B, 2, Bool>,  // true for real tokens
}

/// Inference batch.
#[derive(Debug, Clone, new)]
pub struct TopicInferenceBatch<B: Backend> {
    pub tokens: Tensor<B, 2, Int>,
    pub mask: Tensor<B, 2, Bool>,
}

impl<B: Backend> TopicBatcher<B> {
    fn tensors(&self, collated: Collated) -> (Tensor<B, 2, Int>, Tensor<B, 2, Bool>) {
        let shape = [collated.batch_size, collated.seq_length];
        let tokens = collated
            .tokens
            .into_iter()
            .map(|id| id as i64)
            .collect::<Vec<_>>();

        let tokens = Tensor::from_data(
            TensorData::new(tokens, shape).convert::<B::IntElem>(),
            &self.device,
        );
        let mask = Tensor::from_data(TensorData::new(collated.mask, shape), &self.device);
        (tokens, mask)
    }
}

impl<B: Backend> Batcher<TopicItem, TopicTrainingBatch<B>> for TopicBatcher<B> {
    fn batch(&self, items: Vec<TopicItem>) -> TopicTrainingBatch<B> {
        let labels = items
            .iter()
            .map(|item| item.label as i64)
            .collect::<Vec<_>>();
        let labels = Tensor::from_data(
            TensorData::new(labels, [items.len()]).convert::<B::IntElem>(),
            &self.device,
        );

        let sequences = items.iter().map(|item| item.tokens.as_slice()).collect::<Vec<_>>();
        let (tokens, mask) = self.tensors(collate(&sequences, self.min_seq_length));

        TopicTrainingBatch {
            tokens,
            labels,
            mask,
        }
    }
}

impl<B: Backend> Batcher<Vec<usize>, TopicInferenceBatch<B>> for TopicBatcher<B> {
    fn batch(&self, items: Vec<Vec<usize>>) -> TopicInferenceBatch<B> {
        let (tokens, mask) = self.tensors(collate(&items, self.min_seq_length));
        TopicInferenceBatch { tokens, mask }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn pads_to_longest_sequence() {
        let collated = collate(&[vec![5usize, 6, 7], vec![8], Vec::new()], 0);

        assert_eq!(collated.batch_size, 3);
        assert_eq!(collated.seq_length, 3);
        assert_eq!(collated.row(0), &[5, 6, 7]);
        assert_eq!(collated.row(1), &[8, PAD_ID, PAD_ID]);
        assert_eq!(collated.row(2), &[PAD_ID, PAD_ID, PAD_ID]);
    }

    #[test]
    fn mask_sums_match_sequence_lengths() {
        let sequences: Vec<Vec<usize>> = vec![vec![2, 3, 4, 5], vec![9, 9], vec![7]];
        let collated = collate(&sequences, 5);

        assert_eq!(collated.seq_length, 5);
        for (i, sequence) in sequences.iter().enumerate() {
            let real = collated.mask_row(i).iter().filter(|&&m| m).count();
            assert_eq!(real, sequence.len());
            let padded = &collated.row(i)[sequence.len()..];
            assert!(padded.iter().all(|&id| id == PAD_ID));
            assert!(collated.mask_row(i)[sequence.len()..].iter().all(|&m| !m));
        }
    }

    #[test]
    fn builds_training_tensors() {
        let device = Default::default();
        let batcher = TopicBatcher::<TestBackend>::new(device, 3);
        let items = vec![TopicItem::new(vec![2, 3, 4, 5], 1), TopicItem::new(vec![6], 0)];

        let batch: TopicTrainingBatch<TestBackend> = batcher.batch(items);

        assert_eq!(batch.tokens.dims(), [2, 4]);
        assert_eq!(batch.mask.dims(), [2, 4]);
        assert_eq!(batch.labels.dims(), [2]);
        let tokens: Vec<i64> = batch.tokens.into_data().iter::<i64>().collect();
        assert_eq!(tokens, vec![2, 3, 4, 5, 6, 0, 0, 0]);
        let labels: Vec<i64> = batch.labels.into_data().iter::<i64>().collect();
        assert_eq!(labels, vec![1, 0]);
        let real = batch.mask.int().sum().into_scalar();
        assert_eq!(real, 5);
    }

    #[test]
    fn inference_batch_respects_minimum_length() {
        let device = Default::default();
        let batcher = TopicBatcher::<TestBackend>::new(device, 5);

        let batch: TopicInferenceBatch<TestBackend> = batcher.batch(vec![vec![2, 3]]);

        assert_eq!(batch.tokens.dims(), [1, 5]);
    }
}
