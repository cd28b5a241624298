use anyhow::Result;
use image::{imageops::FilterType, RgbImage};
use std::{ffi::CString, os::raw::{c_char, c_int, c_void}, ptr};
use tracing::info;

use crate::{LeafModel, RawDetection};

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterGetOutputTensorCount(interpreter: *const TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;
}

/// MobileNet-SSD exported with the TFLite detection postprocess op.
///
/// Input: u8 RGB `[1, S, S, 3]`. Outputs: boxes `[1, N, 4]` (ymin, xmin, ymax, xmax),
/// classes `[1, N]`, scores `[1, N]`, count `[1]`.
pub struct TfliteSsd {
    input_size: u32,
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
}

// The interpreter is only touched through &mut self behind the detector's mutex.
unsafe impl Send for TfliteSsd {}

impl TfliteSsd {
    pub fn new(model_path: &str, input_size: u32, threads: i32) -> Result<Self> {
        let cpath = CString::new(model_path)?;
        let model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!model.is_null(), "failed to load tflite model: {}", model_path);

        let opts = unsafe { TfLiteInterpreterOptionsCreate() };
        if opts.is_null() {
            unsafe { TfLiteModelDelete(model) };
            anyhow::bail!("failed to create tflite options");
        }
        unsafe { TfLiteInterpreterOptionsSetNumThreads(opts, threads.max(1)) };

        let interp = unsafe { TfLiteInterpreterCreate(model, opts) };
        if interp.is_null() {
            unsafe {
                TfLiteInterpreterOptionsDelete(opts);
                TfLiteModelDelete(model);
            }
            anyhow::bail!("failed to create tflite interpreter");
        }
        // From here on Drop releases all three handles.
        let this = Self { input_size, model, opts, interp };

        let rc = unsafe { TfLiteInterpreterAllocateTensors(this.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed");

        let outputs = unsafe { TfLiteInterpreterGetOutputTensorCount(this.interp) };
        anyhow::ensure!(outputs >= 4, "expected SSD postprocess outputs (4 tensors), model has {}", outputs);

        info!("vision: loaded TFLite SSD model: {}", model_path);
        Ok(this)
    }

    fn output_f32(&mut self, index: c_int) -> Result<&[f32]> {
        let out = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, index) };
        anyhow::ensure!(!out.is_null(), "no output tensor {}", index);
        let data = unsafe { TfLiteTensorData(out) as *const f32 };
        anyhow::ensure!(!data.is_null(), "null output tensor data {}", index);
        let len = unsafe { TfLiteTensorByteSize(out) } / std::mem::size_of::<f32>();
        Ok(unsafe { std::slice::from_raw_parts(data, len) })
    }
}

impl LeafModel for TfliteSsd {
    fn name(&self) -> &'static str {
        "tflite-ssd"
    }

    fn infer(&mut self, rgb: &RgbImage) -> Result<Vec<RawDetection>> {
        let resized = image::imageops::resize(rgb, self.input_size, self.input_size, FilterType::Triangle);

        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");
        let in_bytes = unsafe { TfLiteTensorByteSize(input) };
        let in_ptr = unsafe { TfLiteTensorData(input) as *mut u8 };
        anyhow::ensure!(!in_ptr.is_null(), "null input tensor data");

        let need = (self.input_size * self.input_size * 3) as usize;
        anyhow::ensure!(in_bytes >= need, "input tensor too small: {} < {}", in_bytes, need);
        unsafe { ptr::copy_nonoverlapping(resized.as_raw().as_ptr(), in_ptr, need) };

        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed");

        let boxes = self.output_f32(0)?.to_vec();
        let classes = self.output_f32(1)?.to_vec();
        let scores = self.output_f32(2)?.to_vec();
        let count = self.output_f32(3)?.first().copied().unwrap_or(0.0).max(0.0) as usize;

        let n = count.min(scores.len()).min(classes.len()).min(boxes.len() / 4);
        Ok((0..n)
            .map(|i| RawDetection {
                class_id: classes[i] as i32,
                score: scores[i],
                ymin: boxes[i * 4],
                xmin: boxes[i * 4 + 1],
                ymax: boxes[i * 4 + 2],
                xmax: boxes[i * 4 + 3],
            })
            .collect())
    }
}

impl Drop for TfliteSsd {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
    }
}
