use serde::{Deserialize, Serialize};
use tilecraft_quant::{QuantLevel, QuantScheme, SourceFormat};

use crate::{ElemType, GraphError, StorageType, TensorDesc};

/// Edge of the tensor-core fragment used by the fragment layout transforms.
pub const FRAGMENT_EDGE: usize = 16;

/// 2D convolution over an NHWC input with an `f x kh x kw x c` weight.
#[derive(new, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conv2d {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
    pub f: usize,
    pub kh: usize,
    pub kw: usize,
    pub stride: usize,
    pub dilation: usize,
    pub padding: usize,
    pub dtype: ElemType,
}

impl Conv2d {
    /// Spatial size of the output, `(oh, ow)`.
    ///
    /// Zero kernel extents and strides are clamped; [Stage::validate] rejects them.
    pub fn output_size(&self) -> (usize, usize) {
        let size = |extent: usize, kernel: usize| {
            (extent + 2 * self.padding).saturating_sub(self.span(kernel)) / self.stride.max(1) + 1
        };
        (size(self.h, self.kh), size(self.w, self.kw))
    }

    /// Extent of the input covered by one dilated kernel row or column.
    fn span(&self, kernel: usize) -> usize {
        self.dilation * kernel.saturating_sub(1) + 1
    }

    /// Key in the `n_f_h_w_c_kh_kw_s_d_p` form.
    pub fn key(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_{}_{}_{}_{}_{}",
            self.n,
            self.f,
            self.h,
            self.w,
            self.c,
            self.kh,
            self.kw,
            self.stride,
            self.dilation,
            self.padding
        )
    }

    fn validate(&self) -> Result<(), GraphError> {
        let dims = [
            self.n, self.c, self.h, self.w, self.f, self.kh, self.kw, self.stride, self.dilation,
        ];
        if dims.contains(&0) {
            return Err(invalid("conv2d", format!("zero extent in {}", self.key())));
        }
        let padded = |extent: usize| extent + 2 * self.padding;
        if padded(self.h) < self.span(self.kh) || padded(self.w) < self.span(self.kw) {
            return Err(invalid(
                "conv2d",
                format!("kernel larger than the padded input in {}", self.key()),
            ));
        }
        Ok(())
    }
}

/// Matrix multiplication `C[m, n] = A[m, k] * B[n, k]^T`.
#[derive(new, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matmul {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub dtype: ElemType,
}

/// Matrix multiplication against low-bit quantized weights decoded on the fly.
#[derive(new, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct DequantizeMatmul {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    /// Type of the activations and of the output.
    pub dtype: ElemType,
    pub scheme: QuantScheme,
    pub with_bias: bool,
    /// Whether the activations may be stored in fragment layout.
    pub propagate_a: bool,
    /// Whether the weights may be stored in fragment layout.
    pub propagate_b: bool,
}

impl DequantizeMatmul {
    /// Descriptor of the packed weight input.
    pub fn weight_desc(&self) -> TensorDesc {
        let elem = ElemType::from(self.scheme.store);
        let storage = StorageType {
            elem,
            bits: self.scheme.size_bits_value() as u8,
        };
        TensorDesc::packed([self.n, self.k], elem, storage)
    }

    fn group_size(&self) -> i64 {
        match self.scheme.level {
            QuantLevel::Channel => -1,
            QuantLevel::Block(size) => size as i64,
        }
    }

    fn validate(&self) -> Result<(), GraphError> {
        let stage = "dequantize_matmul";
        if self.m == 0 || self.n == 0 || self.k == 0 {
            return Err(invalid(stage, "zero extent".into()));
        }
        if !self.dtype.is_float() {
            return Err(invalid(stage, format!("activations must be float, got {}", self.dtype)));
        }
        if (self.k * self.scheme.size_bits_value()) % self.scheme.size_bits_stored() != 0 {
            return Err(invalid(
                stage,
                format!(
                    "k={} doesn't fill whole {}-bit storage elements",
                    self.k,
                    self.scheme.size_bits_stored()
                ),
            ));
        }
        if let QuantLevel::Block(size) = self.scheme.level {
            if size == 0 || self.k % size != 0 {
                return Err(invalid(
                    stage,
                    format!("k={} isn't a multiple of the group size {size}", self.k),
                ));
            }
        }
        if self.propagate_b && (self.n % FRAGMENT_EDGE != 0 || self.k % FRAGMENT_EDGE != 0) {
            return Err(invalid(
                stage,
                format!("weight layout propagation needs n and k multiples of {FRAGMENT_EDGE}"),
            ));
        }
        Ok(())
    }
}

/// Layout transforms between NHWC and the tensor-core fragment layout.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutKind {
    /// `(n, h, w, c)` to `(n, c, h, w)`.
    NhwcToNchw,
    /// `(n, h, w, c)` to `(n/m, h, w, c/n, m, n)`.
    ToFragment { m: usize, n: usize },
    /// `(n/m, h, w, c/n, m, n)` back to `(n, h, w, c)`.
    FromFragment { m: usize, n: usize },
}

/// A layout transform over an NHWC tensor.
#[derive(new, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutTransform {
    pub kind: LayoutKind,
    /// The NHWC shape.
    pub shape: [usize; 4],
    pub dtype: ElemType,
}

impl LayoutTransform {
    fn fragment_shape(&self, m: usize, n: usize) -> Vec<usize> {
        let [bn, h, w, c] = self.shape;
        vec![bn / m, h, w, c / n, m, n]
    }

    fn validate(&self) -> Result<(), GraphError> {
        match self.kind {
            LayoutKind::NhwcToNchw => Ok(()),
            LayoutKind::ToFragment { m, n } | LayoutKind::FromFragment { m, n } => {
                let [bn, _, _, c] = self.shape;
                if m == 0 || n == 0 || bn % m != 0 || c % n != 0 {
                    return Err(invalid(
                        "layout_transform",
                        format!("{:?} isn't divisible by the {m}x{n} fragment", self.shape),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// One computation stage of an operator graph.
///
/// The set of stages is closed; every stage carries its own shape payload from which its input
/// and output descriptors are inferred.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Conv2d(Conv2d),
    Matmul(Matmul),
    DequantizeMatmul(DequantizeMatmul),
    /// Adds a vector along the last dimension.
    BiasAdd { shape: Vec<usize>, dtype: ElemType },
    /// Element-wise sum of two tensors.
    Add { shape: Vec<usize>, dtype: ElemType },
    Relu { shape: Vec<usize>, dtype: ElemType },
    Reshape {
        from: Vec<usize>,
        to: Vec<usize>,
        dtype: ElemType,
    },
    LayoutTransform(LayoutTransform),
}

/// A stage seen as a `m x n x k` matrix multiplication, as used by the scheduling policy.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemmView {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub dtype: ElemType,
    /// Packing of the weights, if they are quantized.
    pub quant: Option<QuantScheme>,
    /// Whether the activations may use the fragment layout.
    pub allow_propagate_a: bool,
    /// Whether the weights may use the fragment layout.
    pub allow_propagate_b: bool,
}

impl GemmView {
    /// Number of arithmetic operations.
    pub fn flops(&self) -> u64 {
        2 * self.m as u64 * self.n as u64 * self.k as u64
    }

    /// Bits used by one weight element in memory.
    pub fn weight_bits(&self) -> usize {
        match &self.quant {
            Some(scheme) => scheme.size_bits_value(),
            None => self.dtype.size_bits(),
        }
    }
}

impl Stage {
    /// Name of the stage kind.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Conv2d(_) => "conv2d",
            Stage::Matmul(_) => "matmul",
            Stage::DequantizeMatmul(_) => "dequantize_matmul",
            Stage::BiasAdd { .. } => "bias_add",
            Stage::Add { .. } => "add",
            Stage::Relu { .. } => "relu",
            Stage::Reshape { .. } => "reshape",
            Stage::LayoutTransform(_) => "layout_transform",
        }
    }

    /// Check that the payload is consistent.
    pub fn validate(&self) -> Result<(), GraphError> {
        match self {
            Stage::Conv2d(conv) => conv.validate(),
            Stage::Matmul(mm) => {
                if mm.m == 0 || mm.n == 0 || mm.k == 0 {
                    return Err(invalid(self.name(), "zero extent".into()));
                }
                Ok(())
            }
            Stage::DequantizeMatmul(mm) => mm.validate(),
            Stage::BiasAdd { shape, .. } | Stage::Add { shape, .. } | Stage::Relu { shape, .. } => {
                if shape.is_empty() || shape.contains(&0) {
                    return Err(invalid(self.name(), format!("invalid shape {shape:?}")));
                }
                Ok(())
            }
            Stage::Reshape { from, to, .. } => {
                let from_elems: usize = from.iter().product();
                let to_elems: usize = to.iter().product();
                if from_elems != to_elems {
                    return Err(invalid(
                        self.name(),
                        format!("can't reshape {from:?} into {to:?}"),
                    ));
                }
                Ok(())
            }
            Stage::LayoutTransform(transform) => transform.validate(),
        }
    }

    /// Ordered input descriptors.
    pub fn inputs(&self) -> Vec<TensorDesc> {
        match self {
            Stage::Conv2d(conv) => vec![
                TensorDesc::new([conv.n, conv.h, conv.w, conv.c], conv.dtype),
                TensorDesc::new([conv.f, conv.kh, conv.kw, conv.c], conv.dtype),
            ],
            Stage::Matmul(mm) => vec![
                TensorDesc::new([mm.m, mm.k], mm.dtype),
                TensorDesc::new([mm.n, mm.k], mm.dtype),
            ],
            Stage::DequantizeMatmul(mm) => {
                let mut inputs = vec![TensorDesc::new([mm.m, mm.k], mm.dtype), mm.weight_desc()];
                if mm.scheme.with_scaling {
                    inputs.push(TensorDesc::new([mm.n, mm.scheme.num_groups(mm.k)], mm.dtype));
                }
                if mm.with_bias {
                    inputs.push(TensorDesc::new([mm.n], mm.dtype));
                }
                inputs
            }
            Stage::BiasAdd { shape, dtype } => {
                let channels = shape.last().copied().unwrap_or_default();
                vec![
                    TensorDesc::new(shape.clone(), *dtype),
                    TensorDesc::new([channels], *dtype),
                ]
            }
            Stage::Add { shape, dtype } => vec![
                TensorDesc::new(shape.clone(), *dtype),
                TensorDesc::new(shape.clone(), *dtype),
            ],
            Stage::Relu { shape, dtype } => vec![TensorDesc::new(shape.clone(), *dtype)],
            Stage::Reshape { from, dtype, .. } => vec![TensorDesc::new(from.clone(), *dtype)],
            Stage::LayoutTransform(transform) => match transform.kind {
                LayoutKind::NhwcToNchw | LayoutKind::ToFragment { .. } => {
                    vec![TensorDesc::new(transform.shape, transform.dtype)]
                }
                LayoutKind::FromFragment { m, n } => {
                    vec![TensorDesc::new(transform.fragment_shape(m, n), transform.dtype)]
                }
            },
        }
    }

    /// Output descriptor.
    pub fn output(&self) -> TensorDesc {
        match self {
            Stage::Conv2d(conv) => {
                let (oh, ow) = conv.output_size();
                TensorDesc::new([conv.n, oh, ow, conv.f], conv.dtype)
            }
            Stage::Matmul(mm) => TensorDesc::new([mm.m, mm.n], mm.dtype),
            Stage::DequantizeMatmul(mm) => TensorDesc::new([mm.m, mm.n], mm.dtype),
            Stage::BiasAdd { shape, dtype }
            | Stage::Add { shape, dtype }
            | Stage::Relu { shape, dtype } => TensorDesc::new(shape.clone(), *dtype),
            Stage::Reshape { to, dtype, .. } => TensorDesc::new(to.clone(), *dtype),
            Stage::LayoutTransform(transform) => match transform.kind {
                LayoutKind::NhwcToNchw => {
                    let [n, h, w, c] = transform.shape;
                    TensorDesc::new([n, c, h, w], transform.dtype)
                }
                LayoutKind::ToFragment { m, n } => {
                    TensorDesc::new(transform.fragment_shape(m, n), transform.dtype)
                }
                LayoutKind::FromFragment { .. } => {
                    TensorDesc::new(transform.shape, transform.dtype)
                }
            },
        }
    }

    /// The stage as a matrix multiplication, for the compute-heavy stages.
    ///
    /// A convolution maps to `m = n*oh*ow`, `n = f` and `k = c*kh*kw`.
    pub fn gemm(&self) -> Option<GemmView> {
        match self {
            Stage::Conv2d(conv) => {
                let (oh, ow) = conv.output_size();
                Some(GemmView {
                    m: conv.n * oh * ow,
                    n: conv.f,
                    k: conv.c * conv.kh * conv.kw,
                    dtype: conv.dtype,
                    quant: None,
                    allow_propagate_a: false,
                    allow_propagate_b: false,
                })
            }
            Stage::Matmul(mm) => Some(GemmView {
                m: mm.m,
                n: mm.n,
                k: mm.k,
                dtype: mm.dtype,
                quant: None,
                allow_propagate_a: false,
                allow_propagate_b: false,
            }),
            Stage::DequantizeMatmul(mm) => Some(GemmView {
                m: mm.m,
                n: mm.n,
                k: mm.k,
                dtype: mm.dtype,
                quant: Some(mm.scheme),
                allow_propagate_a: mm.propagate_a,
                allow_propagate_b: mm.propagate_b,
            }),
            _ => None,
        }
    }

    /// Number of arithmetic operations counted for throughput reporting.
    ///
    /// Only matrix-multiplication-like stages count; element-wise epilogues and data movement
    /// count as zero.
    pub fn flops(&self) -> u64 {
        self.gemm().map(|gemm| gemm.flops()).unwrap_or_default()
    }

    /// Canonical encoding of the stage payload, including every quantization parameter.
    pub fn key(&self) -> String {
        match self {
            Stage::Conv2d(conv) => format!("conv2d:{}:{}", conv.key(), conv.dtype),
            Stage::Matmul(mm) => format!("matmul:{}_{}_{}:{}", mm.m, mm.n, mm.k, mm.dtype),
            Stage::DequantizeMatmul(mm) => {
                let source = match mm.scheme.source {
                    SourceFormat::Uint => "uint",
                    SourceFormat::Int => "int",
                };
                format!(
                    "dequantize_matmul:{}_{}_{}:{}:b{}_g{}_{}_{}_s{}_b{}_f{}_pa{}_pb{}",
                    mm.m,
                    mm.n,
                    mm.k,
                    mm.dtype,
                    mm.scheme.size_bits_value(),
                    mm.group_size(),
                    source,
                    ElemType::from(mm.scheme.store),
                    mm.scheme.with_scaling as u8,
                    mm.with_bias as u8,
                    mm.scheme.fast_decoding as u8,
                    mm.propagate_a as u8,
                    mm.propagate_b as u8,
                )
            }
            Stage::BiasAdd { shape, dtype } => format!("bias_add:{shape:?}:{dtype}"),
            Stage::Add { shape, dtype } => format!("add:{shape:?}:{dtype}"),
            Stage::Relu { shape, dtype } => format!("relu:{shape:?}:{dtype}"),
            Stage::Reshape { from, to, dtype } => format!("reshape:{from:?}->{to:?}:{dtype}"),
            Stage::LayoutTransform(transform) => {
                format!(
                    "layout_transform:{:?}:{:?}:{}",
                    transform.kind, transform.shape, transform.dtype
                )
            }
        }
    }
}

fn invalid(stage: &'static str, reason: String) -> GraphError {
    GraphError::InvalidStage { stage, reason }
}
