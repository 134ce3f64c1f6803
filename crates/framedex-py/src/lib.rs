//! Python bindings for framedex - time-indexed video frame access.
//!
//! Usage:
//! ```python
//! import framedex
//!
//! with framedex.VideoReader("session.mp4", time=timestamps) as video:
//!     print(len(video))
//!     frame = video.get(12.75)          # frame shown at t=12.75
//!     first = video[0]
//!     pixels = frame.tobytes()          # H*W*3 float32, native endian
//!     clip = video[video.get_slice(10.0, 20.0)]
//!     tail = video[-30::2]              # Frames: (count, H, W, 3)
//! ```

use std::path::PathBuf;

use pyo3::exceptions::{PyIOError, PyIndexError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PySlice};

use ::framedex::{DecodedFrame, EngineError, FrameSlice, FrameStack, VideoEngine};

fn to_py_err(e: EngineError) -> PyErr {
    match e {
        EngineError::Open(_) | EngineError::Io(_) => PyIOError::new_err(e.to_string()),
        EngineError::OutOfRange { .. } => PyIndexError::new_err(e.to_string()),
        EngineError::InvalidTimeMap(_) | EngineError::InvalidSlice(_) | EngineError::Config(_) => {
            PyValueError::new_err(e.to_string())
        }
        _ => PyRuntimeError::new_err(e.to_string()),
    }
}

/// Decoded frame: `height × width × 3` float32 RGB in [0, 1].
#[pyclass]
struct Frame {
    #[pyo3(get)]
    ordinal: usize,
    #[pyo3(get)]
    pts: i64,
    #[pyo3(get)]
    height: usize,
    #[pyo3(get)]
    width: usize,
    data: Vec<f32>,
}

impl Frame {
    fn from_decoded(ordinal: usize, frame: &DecodedFrame) -> Self {
        Self {
            ordinal,
            pts: frame.pts,
            height: frame.pixels.height(),
            width: frame.pixels.width(),
            data: frame.pixels.as_slice().to_vec(),
        }
    }
}

#[pymethods]
impl Frame {
    /// `(height, width, 3)`
    #[getter]
    fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, 3)
    }

    /// Flat list of samples, row-major
    fn pixels(&self) -> Vec<f32> {
        self.data.clone()
    }

    /// Raw float32 samples, e.g. for `numpy.frombuffer(..., dtype=numpy.float32)`
    fn tobytes<'py>(&self, py: Python<'py>) -> Bound<'py, PyBytes> {
        let bytes: Vec<u8> = self.data.iter().flat_map(|v| v.to_ne_bytes()).collect();
        PyBytes::new(py, &bytes)
    }

    fn __repr__(&self) -> String {
        format!("Frame(ordinal={}, pts={}, shape=({}, {}, 3))", self.ordinal, self.pts, self.height, self.width)
    }
}

/// Stacked frames from a slice read: `count × height × width × 3` float32.
#[pyclass]
struct Frames {
    #[pyo3(get)]
    ordinals: Vec<usize>,
    #[pyo3(get)]
    count: usize,
    #[pyo3(get)]
    height: usize,
    #[pyo3(get)]
    width: usize,
    data: Vec<f32>,
}

impl From<FrameStack> for Frames {
    fn from(stack: FrameStack) -> Self {
        Self {
            ordinals: stack.ordinals,
            count: stack.count,
            height: stack.height,
            width: stack.width,
            data: stack.data,
        }
    }
}

#[pymethods]
impl Frames {
    /// `(count, height, width, 3)`
    #[getter]
    fn shape(&self) -> (usize, usize, usize, usize) {
        (self.count, self.height, self.width, 3)
    }

    fn __len__(&self) -> usize {
        self.count
    }

    /// Raw float32 samples in `(count, height, width, 3)` order
    fn tobytes<'py>(&self, py: Python<'py>) -> Bound<'py, PyBytes> {
        let bytes: Vec<u8> = self.data.iter().flat_map(|v| v.to_ne_bytes()).collect();
        PyBytes::new(py, &bytes)
    }

    fn __repr__(&self) -> String {
        format!("Frames(count={}, shape=({}, {}, {}, 3))", self.count, self.count, self.height, self.width)
    }
}

/// Random access to the frames of one video stream.
///
/// Args:
///     path: Video file (MP4, MKV, AVI, ...)
///     stream: Video stream index (default: 0)
///     time: Optional ascending timestamps, one per frame. Defaults to
///         `i / fps`.
///
/// Raises:
///     OSError: If the file or stream cannot be opened
#[pyclass(unsendable)]
struct VideoReader {
    engine: Option<VideoEngine>,
}

impl VideoReader {
    fn engine(&mut self) -> PyResult<&mut VideoEngine> {
        self.engine
            .as_mut()
            .ok_or_else(|| PyRuntimeError::new_err("VideoReader is closed"))
    }
}

#[pymethods]
impl VideoReader {
    #[new]
    #[pyo3(signature = (path, stream = 0, time = None))]
    fn new(path: PathBuf, stream: usize, time: Option<Vec<f64>>) -> PyResult<Self> {
        // Init logging (only once)
        let _ = env_logger::try_init();
        log::info!("framedex-py: open({}, stream={})", path.display(), stream);
        let engine = VideoEngine::open(path, stream, time).map_err(to_py_err)?;
        Ok(Self { engine: Some(engine) })
    }

    fn __len__(&mut self) -> PyResult<usize> {
        Ok(self.engine()?.len())
    }

    /// Frame shown at timestamp `ts`
    fn get(&mut self, ts: f64) -> PyResult<Frame> {
        let engine = self.engine()?;
        let ordinal = engine.ordinal_at(ts);
        let frame = engine.frame(ordinal).map_err(to_py_err)?;
        Ok(Frame::from_decoded(ordinal, frame))
    }

    /// Frame at `ordinal`
    fn frame(&mut self, ordinal: usize) -> PyResult<Frame> {
        let frame = self.engine()?.frame(ordinal).map_err(to_py_err)?;
        Ok(Frame::from_decoded(ordinal, frame))
    }

    /// `video[i]` returns a Frame (negative counts from the end),
    /// `video[start:stop:step]` returns Frames
    fn __getitem__(&mut self, key: &Bound<'_, PyAny>) -> PyResult<PyObject> {
        let py = key.py();
        if let Ok(slice) = key.downcast::<PySlice>() {
            let frames = FrameSlice {
                start: slice.getattr("start")?.extract()?,
                stop: slice.getattr("stop")?.extract()?,
                step: slice.getattr("step")?.extract::<Option<isize>>()?.unwrap_or(1),
            };
            let stack = self.engine()?.read_slice(frames).map_err(to_py_err)?;
            return Ok(Py::new(py, Frames::from(stack))?.into_any());
        }

        let ordinal: isize = key.extract()?;
        let engine = self.engine()?;
        let len = engine.len() as isize;
        let index = if ordinal < 0 { ordinal + len } else { ordinal };
        if index < 0 {
            return Err(PyIndexError::new_err(format!("frame index {} out of range", ordinal)));
        }
        let index = index as usize;
        let frame = engine.frame(index).map_err(to_py_err)?;
        Ok(Py::new(py, Frame::from_decoded(index, frame))?.into_any())
    }

    /// Half-open ordinal range covering `[start_ts, stop_ts)`, usable as `video[range]`
    fn get_slice<'py>(&mut self, py: Python<'py>, start_ts: f64, stop_ts: f64) -> PyResult<Bound<'py, PySlice>> {
        let range = self.engine()?.get_slice(start_ts, stop_ts);
        Ok(PySlice::new(
            py,
            range.start.unwrap_or(0),
            range.stop.unwrap_or(0),
            range.step,
        ))
    }

    /// Ordinal shown at timestamp `ts`
    fn ordinal_at(&mut self, ts: f64) -> PyResult<usize> {
        Ok(self.engine()?.ordinal_at(ts))
    }

    /// Timestamp of `ordinal`
    fn timestamp_of(&mut self, ordinal: usize) -> PyResult<f64> {
        Ok(self.engine()?.timestamp_of(ordinal))
    }

    /// `(frames_indexed, keyframes_indexed, complete)`
    fn index_progress(&mut self) -> PyResult<(usize, usize, bool)> {
        let p = self.engine()?.index_progress();
        Ok((p.frames, p.keyframes, p.complete))
    }

    /// Stop background threads and release the file. Safe to call twice.
    fn close(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.close();
        }
    }

    fn __enter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    #[pyo3(signature = (_exc_type = None, _exc = None, _tb = None))]
    fn __exit__(
        &mut self,
        _exc_type: Option<&Bound<'_, PyAny>>,
        _exc: Option<&Bound<'_, PyAny>>,
        _tb: Option<&Bound<'_, PyAny>>,
    ) -> bool {
        self.close();
        false
    }
}

/// Get framedex version string.
#[pyfunction]
fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Python module definition.
#[pymodule]
fn framedex(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<VideoReader>()?;
    m.add_class::<Frame>()?;
    m.add_class::<Frames>()?;
    m.add_function(wrap_pyfunction!(version, m)?)?;
    Ok(())
}
