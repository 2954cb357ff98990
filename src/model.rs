// Convolutional topic classifier over word embeddings, implemented with burn.
//
// tokens [batch, seq] -> embedding [batch, seq, emb]
//   -> one Conv2d per kernel width k, spanning the whole embedding: [batch, filters, seq - k + 1, 1]
//   -> shared batch norm -> relu -> max over time: [batch, filters]
//   -> concat [batch, filters * widths] -> dropout -> linear -> logits [batch, classes]

use crate::data_processing::{EmbeddingMatrix, TopicInferenceBatch, TopicTrainingBatch};
use burn::{
    config::Config,
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Embedding, EmbeddingConfig,
        Initializer, Linear, LinearConfig,
    },
    tensor::{activation::relu, backend::Backend, Bool, Int, Tensor, TensorData},
    train::ClassificationOutput,
};

#[derive(Config, Debug)]
pub struct TopicCnnConfig {
    pub n_words: usize,
    pub n_classes: usize,
    pub kernel_sizes: Vec<usize>,
    #[config(default = 300)]
    pub embedding_size: usize,
    #[config(default = 50)]
    pub num_filters: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
}

#[derive(Module, Debug)]
pub struct TopicCnn<B: Backend> {
    embedding: Embedding<B>,
    convs: Vec<Conv2d<B>>,
    norm: BatchNorm<B, 2>,
    dropout: Dropout,
    projection: Linear<B>,
}

impl TopicCnnConfig {
    /// Model with randomly initialized embeddings, e.g. to load a checkpoint into.
    pub fn init<B: Backend>(&self, device: &B::Device) -> TopicCnn<B> {
        let convs = self
            .kernel_sizes
            .iter()
            .map(|&width| {
                Conv2dConfig::new([1, self.num_filters], [width, self.embedding_size]).init(device)
            })
            .collect();

        TopicCnn {
            embedding: EmbeddingConfig::new(self.n_words, self.embedding_size).init(device),
            convs,
            norm: BatchNormConfig::new(self.num_filters).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            projection: LinearConfig::new(self.kernel_sizes.len() * self.num_filters, self.n_classes)
                .with_initializer(Initializer::XavierUniform { gain: 1.0 })
                .init(device),
        }
    }

    /// Model whose embedding table starts from `matrix`.
    pub fn init_with_embeddings<B: Backend>(
        &self,
        matrix: &EmbeddingMatrix,
        device: &B::Device,
    ) -> TopicCnn<B> {
        debug_assert_eq!(matrix.rows, self.n_words);
        debug_assert_eq!(matrix.dim, self.embedding_size);

        let weight = Tensor::<B, 2>::from_data(
            TensorData::new(matrix.values.clone(), [matrix.rows, matrix.dim])
                .convert::<B::FloatElem>(),
            device,
        );
        let mut model = self.init(device);
        model.embedding.weight = Param::from_tensor(weight);
        model
    }

    /// Shortest sequence every convolution accepts.
    pub fn min_seq_length(&self) -> usize {
        self.kernel_sizes.iter().copied().max().unwrap_or(1)
    }
}

impl<B: Backend> TopicCnn<B> {
    /// Raw class scores, one row per sequence.
    ///
    /// With a mask, embeddings of padded positions are zeroed first.
    pub fn forward(&self, tokens: Tensor<B, 2, Int>, mask: Option<Tensor<B, 2, Bool>>) -> Tensor<B, 2> {
        let embedded = self.embedding.forward(tokens);
        let embedded = match mask {
            Some(mask) => embedded * mask.float().unsqueeze_dim::<3>(2),
            None => embedded,
        };
        // single input channel: [batch, 1, seq, emb]
        let embedded = embedded.unsqueeze_dim::<4>(1);

        let pooled = self
            .convs
            .iter()
            .map(|conv| {
                let features = conv.forward(embedded.clone());
                let features = relu(self.norm.forward(features));
                let [batch_size, channels, positions, _] = features.dims();
                features
                    .reshape([batch_size, channels, positions])
                    .max_dim(2)
                    .reshape([batch_size, channels])
            })
            .collect::<Vec<_>>();

        let features = Tensor::cat(pooled, 1);
        self.projection.forward(self.dropout.forward(features))
    }

    /// Masked forward pass with the cross-entropy loss against the batch labels.
    pub fn forward_classification(&self, item: TopicTrainingBatch<B>) -> ClassificationOutput<B> {
        let logits = self.forward(item.tokens, Some(item.mask));
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), item.labels.clone());

        ClassificationOutput {
            loss,
            output: logits,
            targets: item.labels,
        }
    }

    /// Predicted class ids. The mask is not applied.
    pub fn predict(&self, item: TopicInferenceBatch<B>) -> Vec<usize> {
        predicted_classes(self.forward(item.tokens, None))
    }
}

/// Arg-max class of every row of `logits`.
pub fn predicted_classes<B: Backend>(logits: Tensor<B, 2>) -> Vec<usize> {
    let [batch_size, _] = logits.dims();
    logits
        .argmax(1)
        .reshape([batch_size])
        .into_data()
        .iter::<i64>()
        .map(|class| class as usize)
        .collect()
}
