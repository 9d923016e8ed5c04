// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Mutex;

/// Encoding of the traffic a destination carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestinationMode {
    #[default]
    Plain,
    /// Embedded metric format. Terminal.
    Emf,
}

/// One-way `Plain -> Emf` switch shared by a destination and its pusher.
#[derive(Debug, Default)]
pub struct ModeSwitch {
    mode: Mutex<DestinationMode>,
}

impl ModeSwitch {
    pub fn current(&self) -> DestinationMode {
        // The guarded value is a Copy enum, a poisoned lock still holds a valid mode.
        match self.mode.lock() {
            Ok(mode) => *mode,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn is_emf(&self) -> bool {
        self.current() == DestinationMode::Emf
    }

    /// Switches to EMF. Returns true only for the call that made the
    /// transition.
    pub fn mark_emf(&self) -> bool {
        let mut mode = match self.mode.lock() {
            Ok(mode) => mode,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *mode == DestinationMode::Emf {
            return false;
        }
        *mode = DestinationMode::Emf;
        true
    }
}
