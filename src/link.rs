//! The linker: symbol resolution, segment layout, relocation fixup,
//! and the flat binary image.
//!
//! Layout concatenates every module's text, then every module's data,
//! then bss; common symbols occupy the tail of bss, each sized by the
//! largest request for its name. Module-local labels resolve against
//! their own module's shifted symbol table; everything else resolves
//! against the global table of exports.

use indexmap::IndexMap;
use log::debug;

use core::fmt;

use crate::obj::{Module, Piece, REF_BYTE, REF_HI, REF_HILO};
use crate::word;

/// A linker failure. Linker errors are fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// A symbol was referenced but never defined or exported.
    Unresolved(String),
    /// Two modules exported the same non-common symbol.
    DuplicateExport(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Unresolved(name) => write!(f, "unresolved external {}", name),
            LinkError::DuplicateExport(name) => write!(f, "duplicate export {}", name),
        }
    }
}

impl std::error::Error for LinkError {}

/// The result type used within the linker.
pub type Result<T> = core::result::Result<T, LinkError>;

/// A linked executable image.
#[derive(Debug, PartialEq)]
pub struct Image {
    /// The flat binary: all text, all data, zero-filled bss.
    pub bytes: Vec<u8>,
    /// Exported symbols with their final values, sorted by value.
    pub symbols: Vec<(String, u16)>,
}

/// Links an ordered list of modules, with optional library modules
/// that are pulled in on demand.
#[derive(Debug, Default)]
pub struct Linker {
    modules: Vec<Module>,
    libraries: Vec<Module>,
}

#[derive(Debug, Clone, Copy)]
struct Resolved {
    value: u16,
}

impl Linker {
    pub fn new(modules: Vec<Module>) -> Self {
        Linker {
            modules,
            libraries: Vec::new(),
        }
    }

    /// Add library modules, searched in order for undefined names.
    pub fn with_libraries(mut self, libraries: Vec<Module>) -> Self {
        self.libraries = libraries;
        self
    }

    /// Does `module` define `name` itself (not as an extern record)?
    fn defines(module: &Module, name: &str) -> bool {
        module
            .symtab
            .get(name)
            .is_some_and(|sym| !sym.is_extern())
    }

    /// Is `name` satisfied by some module's export or common?
    fn satisfied(modules: &[Module], name: &str) -> bool {
        modules.iter().any(|module| {
            module
                .symtab
                .get(name)
                .is_some_and(|sym| !sym.is_extern() && (sym.is_export() || sym.is_common()))
        })
    }

    /// The names referenced by `module` that it does not define.
    fn undefined(module: &Module) -> Vec<&str> {
        let mut names = Vec::new();
        for seg in [&module.text, &module.data] {
            for piece in seg {
                if let Piece::Ref(reference) = piece {
                    if reference.has_symbol() && !Self::defines(module, &reference.name) {
                        names.push(reference.name.as_str());
                    }
                }
            }
        }
        names
    }

    /// Pull in library modules for undefined names. The search is
    /// greedy and single-pass: a pulled library's own undefined names
    /// are not used to pull further libraries.
    fn find_libraries(&mut self) {
        let mut wanted: Vec<String> = Vec::new();
        for module in &self.modules {
            for name in Self::undefined(module) {
                if !wanted.iter().any(|seen| seen == name) {
                    wanted.push(name.to_string());
                }
            }
        }
        for name in &wanted {
            if Self::satisfied(&self.modules, name) {
                continue;
            }
            if let Some(at) = self
                .libraries
                .iter()
                .position(|lib| Self::satisfied(core::slice::from_ref(lib), name))
            {
                let lib = self.libraries.remove(at);
                debug!("pulling library module for {}", name);
                self.modules.push(lib);
            }
        }
    }

    /// Link everything into a flat image.
    pub fn link(mut self) -> Result<Image> {
        self.find_libraries();

        // Everything referenced must now be resolvable.
        for module in &self.modules {
            for name in Self::undefined(module) {
                if !Self::satisfied(&self.modules, name) {
                    return Err(LinkError::Unresolved(name.to_string()));
                }
            }
        }

        // Shift each module's own labels by the offset its segment
        // contributions start at; collect exports globally.
        let mut modsyms: Vec<IndexMap<String, Resolved>> =
            vec![IndexMap::new(); self.modules.len()];
        let mut global: IndexMap<String, Resolved> = IndexMap::new();
        let mut offset: u16 = 0;
        for seg in [0u8, 1, 2] {
            for (index, module) in self.modules.iter().enumerate() {
                for (name, sym) in &module.symtab {
                    if sym.seg() != seg || sym.is_extern() || sym.is_common() {
                        continue;
                    }
                    let value = sym.value.wrapping_add(offset);
                    modsyms[index].insert(name.clone(), Resolved { value });
                    if sym.is_export() {
                        if global.contains_key(name) {
                            return Err(LinkError::DuplicateExport(name.clone()));
                        }
                        global.insert(name.clone(), Resolved { value });
                    }
                }
                offset = offset.wrapping_add(match seg {
                    0 => module.text_len(),
                    1 => module.data_len(),
                    _ => module.bss_len,
                });
            }
        }

        // Commons: the largest requested size per name wins, unless a
        // non-common export of the same name exists. Survivors occupy
        // the tail of bss.
        let mut commons: IndexMap<String, u16> = IndexMap::new();
        for module in &self.modules {
            for (name, sym) in &module.symtab {
                if !sym.is_common() {
                    continue;
                }
                let entry = commons.entry(name.clone()).or_insert(0);
                *entry = (*entry).max(sym.value);
            }
        }
        commons.retain(|name, _| !global.contains_key(name));
        let mut common_bss: u16 = 0;
        for (name, size) in &commons {
            let value = offset.wrapping_add(common_bss);
            global.insert(name.clone(), Resolved { value });
            common_bss = common_bss.wrapping_add(*size);
        }
        debug!(
            "layout: {} modules, image end {:#06x}, {} commons",
            self.modules.len(),
            offset.wrapping_add(common_bss),
            commons.len()
        );

        // Copy text then data, patching references as they pass.
        let mut bytes = Vec::new();
        for seg in [0usize, 1] {
            for (index, module) in self.modules.iter().enumerate() {
                let pieces = if seg == 0 { &module.text } else { &module.data };
                for piece in pieces {
                    match piece {
                        Piece::Bytes(run) => bytes.extend_from_slice(run),
                        Piece::Ref(reference) => {
                            let site = word(bytes.len() as i64);
                            let value = if reference.has_symbol() {
                                let found = modsyms[index]
                                    .get(&reference.name)
                                    .or_else(|| global.get(&reference.name))
                                    .ok_or_else(|| {
                                        LinkError::Unresolved(reference.name.clone())
                                    })?;
                                found.value.wrapping_add(reference.con)
                            } else {
                                site.wrapping_add(reference.con)
                            };
                            let [lo, hi] = value.to_le_bytes();
                            let patched = if reference.flags & REF_HILO != 0 {
                                if reference.flags & REF_HI != 0 {
                                    [hi, 0]
                                } else {
                                    [lo, 0]
                                }
                            } else {
                                [lo, hi]
                            };
                            if reference.flags & REF_BYTE != 0 {
                                bytes.push(patched[0]);
                            } else {
                                bytes.extend_from_slice(&patched);
                            }
                        }
                    }
                }
            }
        }

        // Zero-filled bss, including the common tail.
        let bss_total: u16 = self
            .modules
            .iter()
            .fold(0u16, |sum, module| sum.wrapping_add(module.bss_len))
            .wrapping_add(common_bss);
        bytes.extend(core::iter::repeat(0u8).take(bss_total as usize));

        let mut symbols: Vec<(String, u16)> = global
            .iter()
            .map(|(name, resolved)| (name.clone(), resolved.value))
            .collect();
        symbols.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        Ok(Image { bytes, symbols })
    }
}
