// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Instance
//!
//! The process-wide Vulkan connection.  Engines share it through an `Arc`.
//!
//! Validation output is routed to a `DebugSink` handed in at construction.  The default
//! `LogSink` forwards to the `log` facade, so binaries pick the final output with whatever logger
//! they install.

use std::ffi::{CStr, CString, c_void};

use ash::vk;

use crate::util::fixed_name;
use crate::{VkResultExt, VulkanError};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Message severity, ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn from_vk(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        if flags.contains(S::ERROR) {
            Severity::Error
        } else if flags.contains(S::WARNING) {
            Severity::Warning
        } else if flags.contains(S::INFO) {
            Severity::Info
        } else {
            Severity::Verbose
        }
    }

    fn level(self) -> log::Level {
        match self {
            Severity::Verbose => log::Level::Trace,
            Severity::Info => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error => log::Level::Error,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    General,
    Validation,
    Performance,
}

impl Category {
    pub fn from_vk(flags: vk::DebugUtilsMessageTypeFlagsEXT) -> Self {
        use vk::DebugUtilsMessageTypeFlagsEXT as T;
        if flags.contains(T::VALIDATION) {
            Category::Validation
        } else if flags.contains(T::PERFORMANCE) {
            Category::Performance
        } else {
            Category::General
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Category::General => "(General)",
            Category::Validation => "(Validation)",
            Category::Performance => "(Performance)",
        }
    }
}

/// Receives debug and validation messages.  Called from whatever thread the driver uses.
pub trait DebugSink: Send + Sync {
    fn message(&self, severity: Severity, category: Category, message: &str);
}

/// Forward messages at or above `min` to the `log` facade.
#[derive(Clone, Copy, Debug)]
pub struct LogSink {
    pub min: Severity,
}

impl Default for LogSink {
    fn default() -> Self {
        LogSink {
            min: Severity::Warning,
        }
    }
}

impl DebugSink for LogSink {
    fn message(&self, severity: Severity, category: Category, message: &str) {
        if severity < self.min {
            return;
        }
        log::log!(target: "vulkan", severity.level(), "{} {}", category.prefix(), message);
    }
}

/// Instance configuration.
#[derive(bon::Builder, Clone, Debug)]
pub struct InstanceConfig {
    #[builder(into, default = String::from("Lantern"))]
    pub application_name: String,

    #[builder(default = vk::API_VERSION_1_3)]
    pub api_version: u32,

    /// Enable the Khronos validation layer and the debug messenger.
    #[builder(default)]
    pub validation: bool,

    /// Enable the surface extension for engines that will present.
    #[builder(default = true)]
    pub graphics: bool,

    /// Used when no sink is supplied.
    #[builder(default = Severity::Warning)]
    pub min_severity: Severity,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        InstanceConfig::builder().build()
    }
}

pub struct Instance {
    entry: ash::Entry,
    instance: ash::Instance,
    messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    // NOTE double boxed so the callback user data is a thin, stable pointer
    sink: Box<Box<dyn DebugSink>>,
    validation: bool,
}

impl Instance {
    /// Connect to the Vulkan loader.  `sink` receives validation messages.  `None` uses a
    /// `LogSink` at the configured minimum severity.
    pub fn new(
        config: &InstanceConfig,
        sink: Option<Box<dyn DebugSink>>,
    ) -> Result<Self, VulkanError> {
        let entry = unsafe { ash::Entry::load()? };
        let sink: Box<Box<dyn DebugSink>> = Box::new(sink.unwrap_or_else(|| {
            Box::new(LogSink {
                min: config.min_severity,
            })
        }));

        let validation = config.validation && layer_available(&entry, VALIDATION_LAYER)?;
        if config.validation && !validation {
            log::warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
        }

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|_| VulkanError::Precondition("application name contains a nul byte"))?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"Lantern")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(config.api_version);

        let mut extensions = vec![vk::EXT_DEBUG_UTILS_NAME.as_ptr()];
        if config.graphics {
            extensions.push(vk::KHR_SURFACE_NAME.as_ptr());
        }
        let layers = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance =
            unsafe { entry.create_instance(&create_info, None) }.during("vkCreateInstance")?;

        let messenger = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let user_data = &*sink as *const Box<dyn DebugSink> as *mut c_void;
            let messenger_ci = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback))
                .user_data(user_data);

            match unsafe { loader.create_debug_utils_messenger(&messenger_ci, None) } {
                Ok(m) => Some((loader, m)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e).during("vkCreateDebugUtilsMessengerEXT");
                }
            }
        } else {
            None
        };

        log::info!(
            "instance created (validation: {validation}, api {}.{})",
            vk::api_version_major(config.api_version),
            vk::api_version_minor(config.api_version)
        );

        Ok(Instance {
            entry,
            instance,
            messenger,
            sink,
            validation,
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn validation_enabled(&self) -> bool {
        self.validation
    }

    /// Send a message through the configured sink.
    pub fn report(&self, severity: Severity, category: Category, message: &str) {
        self.sink.message(severity, category, message);
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("instance destroyed");
    }
}

fn layer_available(entry: &ash::Entry, layer: &CStr) -> Result<bool, VulkanError> {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }
        .during("vkEnumerateInstanceLayerProperties")?;
    Ok(layers.iter().any(|l| fixed_name(&l.layer_name) == layer))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_user_data.is_null() || p_callback_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY user data is the sink box owned by the Instance, which outlives the messenger.
    let sink = unsafe { &*(p_user_data as *const Box<dyn DebugSink>) };
    let p_message = unsafe { (*p_callback_data).p_message };
    let message = if p_message.is_null() {
        std::borrow::Cow::Borrowed("")
    } else {
        unsafe { CStr::from_ptr(p_message) }.to_string_lossy()
    };

    sink.message(
        Severity::from_vk(message_severity),
        Category::from_vk(message_types),
        &message,
    );
    vk::FALSE
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct Collect(Arc<Mutex<Vec<(Severity, Category, String)>>>);

    impl DebugSink for Collect {
        fn message(&self, severity: Severity, category: Category, message: &str) {
            self.0
                .lock()
                .unwrap()
                .push((severity, category, message.to_owned()));
        }
    }

    #[test]
    fn classify_messages() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        use vk::DebugUtilsMessageTypeFlagsEXT as T;

        assert_eq!(Severity::from_vk(S::ERROR), Severity::Error);
        assert_eq!(Severity::from_vk(S::WARNING), Severity::Warning);
        assert_eq!(Severity::from_vk(S::VERBOSE), Severity::Verbose);
        assert_eq!(Category::from_vk(T::GENERAL), Category::General);
        assert_eq!(Category::from_vk(T::VALIDATION), Category::Validation);
        assert_eq!(Category::from_vk(T::PERFORMANCE).prefix(), "(Performance)");
        assert!(Severity::Verbose < Severity::Error);
    }

    #[test]
    fn callback_reaches_sink() {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink: Box<Box<dyn DebugSink>> = Box::new(Box::new(Collect(seen.clone())));
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: c"descriptor set 0 not bound".as_ptr(),
            ..Default::default()
        };

        let ret = unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                &*sink as *const Box<dyn DebugSink> as *mut c_void,
            )
        };
        assert_eq!(ret, vk::FALSE);

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[(
                Severity::Error,
                Category::Validation,
                "descriptor set 0 not bound".to_owned()
            )]
        );
    }

    #[test]
    fn config_defaults() {
        let config = InstanceConfig::default();
        assert_eq!(config.application_name, "Lantern");
        assert_eq!(config.api_version, vk::API_VERSION_1_3);
        assert!(!config.validation);
        assert!(config.graphics);

        let config = InstanceConfig::builder()
            .validation(true)
            .application_name("viewer")
            .build();
        assert!(config.validation);
        assert_eq!(config.application_name, "viewer");
    }
}
