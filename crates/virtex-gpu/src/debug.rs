//! Validation messages routed to the diagnostic sink.

use crate::error::Result;
use ash::vk;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ffi::{c_void, CStr};
use std::sync::Arc;
use virtex_core::{DeviceError, DeviceErrorKind, Diagnostic, DiagnosticSink, Severity};

/// Collects driver diagnostics and the errors they imply.
///
/// Shared with the debug messenger callback, which may fire on driver threads.
#[derive(Default)]
pub struct DiagnosticHub {
    sink: Mutex<Option<DiagnosticSink>>,
    errors: Mutex<VecDeque<DeviceError>>,
}

impl DiagnosticHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the diagnostic sink.
    pub fn set_sink(&self, sink: DiagnosticSink) {
        *self.sink.lock() = Some(sink);
    }

    /// Deliver a diagnostic to the sink, if one is installed.
    pub fn report(&self, diagnostic: &Diagnostic) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink(diagnostic);
        }
    }

    /// Record a device error.
    pub fn push_error(&self, error: DeviceError) {
        self.errors.lock().push_back(error);
    }

    /// Take the oldest recorded error.
    pub fn take_error(&self) -> Option<DeviceError> {
        self.errors.lock().pop_front()
    }

    /// Number of errors waiting to be taken.
    pub fn pending_errors(&self) -> usize {
        self.errors.lock().len()
    }

    fn handle_message(
        &self,
        severity: vk::DebugUtilsMessageSeverityFlagsEXT,
        types: vk::DebugUtilsMessageTypeFlagsEXT,
        id: i32,
        message: String,
    ) {
        let severity = map_severity(severity);
        let source = message_source(types).to_string();

        if severity == Severity::Error && types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION)
        {
            self.push_error(DeviceError::new(
                DeviceErrorKind::Validation,
                id,
                message.clone(),
            ));
        }

        self.report(&Diagnostic {
            severity,
            source,
            message,
        });
    }
}

fn map_severity(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Severity {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        Severity::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        Severity::Warning
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        Severity::Info
    } else {
        Severity::Verbose
    }
}

fn message_source(types: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || user_data.is_null() {
        return vk::FALSE;
    }

    let data = &*callback_data;
    let message = if data.p_message.is_null() {
        String::new()
    } else {
        CStr::from_ptr(data.p_message).to_string_lossy().into_owned()
    };

    let hub = &*user_data.cast::<DiagnosticHub>();
    hub.handle_message(severity, types, data.message_id_number, message);

    vk::FALSE
}

/// Debug utils messenger feeding a [`DiagnosticHub`].
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    // Referenced by the callback's user data pointer
    _hub: Arc<DiagnosticHub>,
}

impl DebugMessenger {
    /// Register a messenger for warnings and errors.
    ///
    /// # Safety
    /// The instance must have been created with `VK_EXT_debug_utils` enabled
    /// and must outlive the messenger.
    pub unsafe fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        hub: Arc<DiagnosticHub>,
    ) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
            .user_data(Arc::as_ptr(&hub).cast_mut().cast::<c_void>());

        let messenger = loader.create_debug_utils_messenger(&create_info, None)?;

        Ok(Self {
            loader,
            messenger,
            _hub: hub,
        })
    }

    /// Unregister the messenger.
    ///
    /// # Safety
    /// The instance must still be valid.
    pub unsafe fn destroy(&self) {
        self.loader
            .destroy_debug_utils_messenger(self.messenger, None);
    }
}
