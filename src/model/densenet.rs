//! DenseNet-BC Architecture
//!
//! Dense blocks concatenate every layer's output onto its input, so a block
//! of `n` layers grows the channel count by `n * growth_rate`. Transitions
//! between blocks compress the channels and halve the spatial size.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{
            AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
            MaxPool2dConfig,
        },
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, Linear, LinearConfig,
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::utils::error::DefectError;

/// Configuration for the DenseNet model
#[derive(Config, Debug)]
pub struct DenseNetConfig {
    /// Channels added by every dense layer
    #[config(default = "32")]
    pub growth_rate: usize,

    /// Number of layers in each dense block
    #[config(default = "vec![16, 16, 16]")]
    pub block_config: Vec<usize>,

    /// Channels produced by the stem convolution
    #[config(default = "24")]
    pub num_init_features: usize,

    /// Bottleneck width multiplier (1x1 conv has `bn_size * growth_rate` channels)
    #[config(default = "4")]
    pub bn_size: usize,

    /// Dropout after each dense layer (0 disables)
    #[config(default = "0.0")]
    pub drop_rate: f64,

    /// Channel reduction in transition layers
    #[config(default = "0.5")]
    pub compression: f64,

    #[config(default = "12")]
    pub num_classes: usize,

    /// Use a single 3x3 stem without downsampling (32x32-scale inputs)
    #[config(default = "false")]
    pub small_inputs: bool,
}

impl DenseNetConfig {
    /// Three equal blocks for a DenseNet-BC of the given depth
    pub fn from_depth(
        depth: usize,
        growth_rate: usize,
        num_classes: usize,
    ) -> crate::utils::error::Result<Self> {
        if depth <= 4 || (depth - 4) % 3 != 0 {
            return Err(DefectError::Model(format!("Invalid depth: {depth}")));
        }
        let layers = (depth - 4) / 6;
        if layers == 0 {
            return Err(DefectError::Model(format!("Invalid depth: {depth}")));
        }

        Ok(Self::new()
            .with_growth_rate(growth_rate)
            .with_block_config(vec![layers; 3])
            .with_num_classes(num_classes))
    }

    /// Check the hyperparameters before building
    pub fn validate(&self) -> crate::utils::error::Result<()> {
        if self.num_classes == 0 {
            return Err(DefectError::Model("num_classes must be greater than 0".to_string()));
        }
        if self.block_config.is_empty() {
            return Err(DefectError::Model("block_config must have at least one block".to_string()));
        }
        if !(self.compression > 0.0 && self.compression <= 1.0) {
            return Err(DefectError::Model(format!(
                "compression must be in (0, 1], got {}",
                self.compression
            )));
        }
        if !(0.0..1.0).contains(&self.drop_rate) {
            return Err(DefectError::Model("drop_rate must be in range [0.0, 1.0)".to_string()));
        }
        Ok(())
    }

    /// Channels after each block (before its transition), in order
    pub fn block_features(&self) -> Vec<usize> {
        let mut features = self.num_init_features;
        let mut out = Vec::with_capacity(self.block_config.len());
        for (i, &num_layers) in self.block_config.iter().enumerate() {
            features += num_layers * self.growth_rate;
            out.push(features);
            if i + 1 != self.block_config.len() {
                features = compressed(features, self.compression);
            }
        }
        out
    }

    /// Channels entering the classifier
    pub fn num_features(&self) -> usize {
        self.block_features()
            .last()
            .copied()
            .unwrap_or(self.num_init_features)
    }

    /// Total network depth counted the DenseNet-BC way
    pub fn depth(&self) -> usize {
        self.block_config.iter().map(|n| 2 * n).sum::<usize>() + self.block_config.len() + 1
    }

    /// Build the model
    pub fn init<B: Backend>(&self, device: &B::Device) -> DenseNet<B> {
        DenseNet::new(self, device)
    }
}

fn compressed(features: usize, compression: f64) -> usize {
    (features as f64 * compression).floor() as usize
}

fn conv_config(channels: [usize; 2], kernel: usize, stride: usize, padding: usize) -> Conv2dConfig {
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .with_initializer(Initializer::KaimingNormal {
            gain: std::f64::consts::SQRT_2,
            fan_out_only: false,
        })
}

/// BN-ReLU-Conv1x1-BN-ReLU-Conv3x3 bottleneck layer
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    pub norm1: BatchNorm<B, 2>,
    pub conv1: Conv2d<B>,
    pub norm2: BatchNorm<B, 2>,
    pub conv2: Conv2d<B>,
    pub relu: Relu,
    pub dropout: Option<Dropout>,
}

impl<B: Backend> DenseLayer<B> {
    pub fn new(
        in_features: usize,
        growth_rate: usize,
        bn_size: usize,
        drop_rate: f64,
        device: &B::Device,
    ) -> Self {
        let bottleneck = bn_size * growth_rate;
        Self {
            norm1: BatchNormConfig::new(in_features).init(device),
            conv1: conv_config([in_features, bottleneck], 1, 1, 0).init(device),
            norm2: BatchNormConfig::new(bottleneck).init(device),
            conv2: conv_config([bottleneck, growth_rate], 3, 1, 1).init(device),
            relu: Relu::new(),
            dropout: (drop_rate > 0.0).then(|| DropoutConfig::new(drop_rate).init()),
        }
    }

    /// Returns only the new `growth_rate` channels
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(self.relu.forward(self.norm1.forward(x)));
        let x = self.conv2.forward(self.relu.forward(self.norm2.forward(x)));

        match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        }
    }
}

/// A stack of dense layers whose outputs are concatenated along channels
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    pub layers: Vec<DenseLayer<B>>,
}

impl<B: Backend> DenseBlock<B> {
    pub fn new(
        num_layers: usize,
        in_features: usize,
        growth_rate: usize,
        bn_size: usize,
        drop_rate: f64,
        device: &B::Device,
    ) -> Self {
        let layers = (0..num_layers)
            .map(|i| {
                DenseLayer::new(in_features + i * growth_rate, growth_rate, bn_size, drop_rate, device)
            })
            .collect();
        Self { layers }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.layers.iter().fold(x, |features, layer| {
            let new_features = layer.forward(features.clone());
            Tensor::cat(vec![features, new_features], 1)
        })
    }
}

/// BN-ReLU-Conv1x1 compression followed by 2x2 average pooling
#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    pub norm: BatchNorm<B, 2>,
    pub conv: Conv2d<B>,
    pub relu: Relu,
    pub pool: AvgPool2d,
}

impl<B: Backend> Transition<B> {
    pub fn new(in_features: usize, out_features: usize, device: &B::Device) -> Self {
        Self {
            norm: BatchNormConfig::new(in_features).init(device),
            conv: conv_config([in_features, out_features], 1, 1, 0).init(device),
            relu: Relu::new(),
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(self.relu.forward(self.norm.forward(x)));
        self.pool.forward(x)
    }
}

/// DenseNet-BC classifier
///
/// Architecture:
/// - Stem: 3x3 conv (small inputs) or 7x7/2 conv + BN + ReLU + 3x3/2 max-pool
/// - Dense blocks separated by compressing transitions
/// - Final BN + ReLU, global average pooling and a linear classifier
#[derive(Module, Debug)]
pub struct DenseNet<B: Backend> {
    pub conv0: Conv2d<B>,
    pub norm0: Option<BatchNorm<B, 2>>,
    pub pool0: Option<MaxPool2d>,

    pub blocks: Vec<DenseBlock<B>>,
    /// One fewer than `blocks`; transition `i` follows block `i`
    pub transitions: Vec<Transition<B>>,

    pub norm_final: BatchNorm<B, 2>,
    pub relu: Relu,
    pub global_pool: AdaptiveAvgPool2d,
    pub classifier: Linear<B>,

    num_classes: usize,
}

impl<B: Backend> DenseNet<B> {
    pub fn new(config: &DenseNetConfig, device: &B::Device) -> Self {
        let init = config.num_init_features;

        let (conv0, norm0, pool0) = if config.small_inputs {
            (conv_config([3, init], 3, 1, 1).init(device), None, None)
        } else {
            (
                conv_config([3, init], 7, 2, 3).init(device),
                Some(BatchNormConfig::new(init).init(device)),
                Some(
                    MaxPool2dConfig::new([3, 3])
                        .with_strides([2, 2])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .init(),
                ),
            )
        };

        let mut blocks = Vec::with_capacity(config.block_config.len());
        let mut transitions = Vec::new();
        let mut features = init;
        for (i, &num_layers) in config.block_config.iter().enumerate() {
            blocks.push(DenseBlock::new(
                num_layers,
                features,
                config.growth_rate,
                config.bn_size,
                config.drop_rate,
                device,
            ));
            features += num_layers * config.growth_rate;

            if i + 1 != config.block_config.len() {
                let out_features = compressed(features, config.compression);
                transitions.push(Transition::new(features, out_features, device));
                features = out_features;
            }
        }

        Self {
            conv0,
            norm0,
            pool0,
            blocks,
            transitions,
            norm_final: BatchNormConfig::new(features).init(device),
            relu: Relu::new(),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            classifier: LinearConfig::new(features, config.num_classes).init(device),
            num_classes: config.num_classes,
        }
    }

    /// Forward pass through the network
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.conv0.forward(x);
        if let Some(norm) = &self.norm0 {
            x = self.relu.forward(norm.forward(x));
        }
        if let Some(pool) = &self.pool0 {
            x = pool.forward(x);
        }

        for (i, block) in self.blocks.iter().enumerate() {
            x = block.forward(x);
            if let Some(transition) = self.transitions.get(i) {
                x = transition.forward(x);
            }
        }

        let x = self.relu.forward(self.norm_final.forward(x));
        let x = self.global_pool.forward(x);

        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        self.classifier.forward(x)
    }

    /// Forward pass with softmax for inference
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    /// Get the number of output classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Number of trainable scalars
    pub fn num_parameters(&self) -> usize {
        self.num_params()
    }

    /// One-line-per-stage description
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        let [out_c, in_c, k, _] = self.conv0.weight.dims();
        lines.push(format!(
            "stem: conv {k}x{k} {in_c}->{out_c}{}",
            if self.pool0.is_some() { " + bn/relu/maxpool" } else { "" }
        ));
        for (i, block) in self.blocks.iter().enumerate() {
            lines.push(format!("dense block {}: {} layers", i + 1, block.layers.len()));
            if let Some(transition) = self.transitions.get(i) {
                let [out_c, in_c, _, _] = transition.conv.weight.dims();
                lines.push(format!("transition {}: {in_c}->{out_c}", i + 1));
            }
        }
        let [in_f, out_f] = self.classifier.weight.dims();
        lines.push(format!("classifier: {in_f}->{out_f}"));
        lines.push(format!("parameters: {}", self.num_parameters()));
        lines.join("\n")
    }
}
