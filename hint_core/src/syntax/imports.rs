//! Import resolution for names used in annotations.
//!
//! Names resolve, in order, to builtins, `typing` members, classes defined
//! in the project (or an indexed virtual environment), well-known standard
//! library classes and standard library modules.

use super::python::PythonModule;
use crate::annotator::{ImportResolver, Resolution};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Builtin names that never need an import.
pub const BUILTIN_NAMES: &[&str] = &[
    "ArithmeticError", "AssertionError", "AttributeError", "BaseException",
    "BlockingIOError", "BrokenPipeError", "BufferError", "ChildProcessError",
    "ConnectionAbortedError", "ConnectionError", "ConnectionRefusedError",
    "ConnectionResetError", "EOFError", "Ellipsis", "EnvironmentError", "Exception",
    "FileExistsError", "FileNotFoundError", "FloatingPointError", "GeneratorExit",
    "IOError", "ImportError", "IndentationError", "IndexError", "InterruptedError",
    "IsADirectoryError", "KeyError", "KeyboardInterrupt", "LookupError", "MemoryError",
    "ModuleNotFoundError", "NameError", "NotADirectoryError", "NotImplemented",
    "NotImplementedError", "OSError", "OverflowError", "PermissionError",
    "ProcessLookupError", "RecursionError", "ReferenceError", "RuntimeError",
    "StopAsyncIteration", "StopIteration", "SyntaxError", "SystemError", "SystemExit",
    "TabError", "TimeoutError", "TypeError", "UnboundLocalError", "UnicodeDecodeError",
    "UnicodeEncodeError", "UnicodeError", "UnicodeTranslateError", "ValueError",
    "ZeroDivisionError", "bool", "bytearray", "bytes", "complex", "dict", "float",
    "frozenset", "int", "list", "memoryview", "object", "range", "set", "slice", "str",
    "tuple", "type", "None",
];

/// Names imported from `typing`.
pub const TYPING_NAMES: &[&str] = &[
    "Any", "AnyStr", "AsyncGenerator", "AsyncIterable", "AsyncIterator", "Awaitable",
    "BinaryIO", "ByteString", "Callable", "ChainMap", "ClassVar", "Collection",
    "Container", "ContextManager", "Coroutine", "Counter", "DefaultDict", "Deque", "Dict",
    "Final", "FrozenSet", "Generator", "Generic", "Hashable", "IO", "ItemsView",
    "Iterable", "Iterator", "KeysView", "List", "Literal", "Mapping", "MappingView",
    "Match", "MutableMapping", "MutableSequence", "MutableSet", "NamedTuple", "NoReturn",
    "Optional", "OrderedDict", "Pattern", "Protocol", "Reversible", "Sequence", "Set",
    "Sized", "SupportsAbs", "SupportsFloat", "SupportsIndex", "SupportsInt", "TextIO",
    "Tuple", "Type", "TypeVar", "TypedDict", "Union", "ValuesView",
];

/// Standard library classes and the module providing them.
pub const STDLIB_NAMES: &[(&str, &str)] = &[
    ("ArgumentParser", "argparse"),
    ("BytesIO", "io"),
    ("CompletedProcess", "subprocess"),
    ("Decimal", "decimal"),
    ("Enum", "enum"),
    ("Fraction", "fractions"),
    ("FunctionType", "types"),
    ("IntEnum", "enum"),
    ("Lock", "threading"),
    ("Logger", "logging"),
    ("ModuleType", "types"),
    ("Namespace", "argparse"),
    ("Path", "pathlib"),
    ("Popen", "subprocess"),
    ("PurePath", "pathlib"),
    ("Queue", "queue"),
    ("Random", "random"),
    ("SimpleNamespace", "types"),
    ("StringIO", "io"),
    ("TextIOWrapper", "io"),
    ("Thread", "threading"),
    ("TracebackType", "types"),
    ("UUID", "uuid"),
    ("date", "datetime"),
    ("datetime", "datetime"),
    ("defaultdict", "collections"),
    ("deque", "collections"),
    ("partial", "functools"),
    ("timedelta", "datetime"),
    ("timezone", "datetime"),
];

/// Standard library modules used as qualifiers, as in `os.PathLike`.
pub const STDLIB_MODULES: &[&str] = &[
    "abc", "argparse", "asyncio", "collections", "csv", "datetime", "decimal", "enum",
    "functools", "io", "itertools", "json", "logging", "math", "os", "pathlib", "queue",
    "random", "re", "socket", "sqlite3", "subprocess", "sys", "threading", "types",
    "typing", "uuid",
];

/// Directory names never indexed.
pub const SKIPPED_DIRS: &[&str] = &[
    "venv", ".venv", "env", ".env", "virtualenv", "__pycache__", ".git", "node_modules",
];

/// Resolves names against the standard library and a class index built
/// from Python files on disk.
#[derive(Debug, Clone, Default)]
pub struct ProjectImportResolver {
    project_root: PathBuf,
    classes: HashMap<String, String>,
}

impl ProjectImportResolver {
    /// Creates a resolver with an empty class index.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            classes: HashMap::new(),
        }
    }

    /// Indexes the project's classes. Returns the number of classes found.
    pub fn index_project(&mut self) -> usize {
        let root = self.project_root.clone();
        self.index_directory(&root, &root)
    }

    /// Indexes classes of packages installed in a virtual environment.
    pub fn index_virtualenv(&mut self, venv: &Path) -> usize {
        let site_packages: Vec<PathBuf> = WalkDir::new(venv)
            .max_depth(4)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_dir() && e.file_name() == "site-packages")
            .map(DirEntry::into_path)
            .collect();
        site_packages
            .iter()
            .map(|dir| self.index_directory(dir, dir))
            .sum()
    }

    /// Indexes every `.py`/`.pyi` file below `dir`, naming modules relative
    /// to `package_root`. The first definition of a class name wins.
    pub fn index_directory(&mut self, dir: &Path, package_root: &Path) -> usize {
        let mut found = 0;
        let walker = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));
        for entry in walker.filter_map(Result::ok) {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_python_file(path) {
                continue;
            }
            let Some(module) = path
                .strip_prefix(package_root)
                .ok()
                .and_then(module_name)
            else {
                continue;
            };
            let source = match fs::read_to_string(path) {
                Ok(source) => source,
                Err(err) => {
                    log::debug!("skipping {}: {}", path.display(), err);
                    continue;
                }
            };
            let Ok(parsed) = PythonModule::parse(&source) else {
                continue;
            };
            for class in parsed.classes() {
                if self.add_class(class, module.clone()) {
                    found += 1;
                }
            }
        }
        log::debug!("indexed {} classes under {}", found, dir.display());
        found
    }

    /// Records `name` as defined in `module`. Returns false if the name was
    /// already known.
    pub fn add_class(&mut self, name: impl Into<String>, module: impl Into<String>) -> bool {
        let name = name.into();
        if self.classes.contains_key(&name) {
            return false;
        }
        self.classes.insert(name, module.into());
        true
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    fn module_of(&self, file: &Path) -> Option<String> {
        file.strip_prefix(&self.project_root).ok().and_then(module_name)
    }
}

impl ImportResolver for ProjectImportResolver {
    fn resolve(&self, name: &str, file: &Path) -> Option<Resolution> {
        if BUILTIN_NAMES.contains(&name) {
            return Some(Resolution::Available);
        }
        if TYPING_NAMES.contains(&name) {
            return Some(Resolution::Import(format!("from typing import {}", name)));
        }
        if let Some(module) = self.classes.get(name) {
            if self.module_of(file).as_deref() == Some(module.as_str()) {
                return Some(Resolution::Available);
            }
            // A nested class is reached through its outermost class.
            let outer = name.split('.').next().unwrap_or(name);
            return Some(Resolution::Import(format!("from {} import {}", module, outer)));
        }
        if let Some((_, module)) = STDLIB_NAMES.iter().find(|(n, _)| *n == name) {
            return Some(Resolution::Import(format!("from {} import {}", module, name)));
        }
        if STDLIB_MODULES.contains(&name) {
            return Some(Resolution::Import(format!("import {}", name)));
        }
        None
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name) || name.starts_with('.'))
            .unwrap_or(true)
}

/// Returns true for `.py` and `.pyi` files.
pub fn is_python_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("py") | Some("pyi")
    )
}

/// Dotted module name for a path relative to a package root:
/// `pkg/sub/mod.py` is `pkg.sub.mod`, `pkg/__init__.py` is `pkg`.
pub fn module_name(relative: &Path) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    let components: Vec<_> = relative.components().collect();
    for (index, component) in components.iter().enumerate() {
        let part = component.as_os_str().to_str()?;
        let part = if index + 1 == components.len() {
            Path::new(part).file_stem()?.to_str()?
        } else {
            part
        };
        if part == "__init__" && index + 1 == components.len() {
            continue;
        }
        if !is_identifier(part) {
            return None;
        }
        parts.push(part.to_string());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("."))
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_module_name() {
        assert_eq!(module_name(Path::new("pkg/sub/mod.py")).as_deref(), Some("pkg.sub.mod"));
        assert_eq!(module_name(Path::new("pkg/__init__.py")).as_deref(), Some("pkg"));
        assert_eq!(module_name(Path::new("top.pyi")).as_deref(), Some("top"));
        assert_eq!(module_name(Path::new("my-scripts/run.py")), None);
    }

    #[test]
    fn test_builtin_typing_and_stdlib() {
        let resolver = ProjectImportResolver::new("/project");
        let file = Path::new("/project/app.py");
        assert_eq!(resolver.resolve("int", file), Some(Resolution::Available));
        assert_eq!(
            resolver.resolve("Optional", file),
            Some(Resolution::Import("from typing import Optional".into()))
        );
        assert_eq!(
            resolver.resolve("Path", file),
            Some(Resolution::Import("from pathlib import Path".into()))
        );
        assert_eq!(
            resolver.resolve("os", file),
            Some(Resolution::Import("import os".into()))
        );
        assert_eq!(resolver.resolve("Mystery", file), None);
    }

    #[test]
    fn test_project_classes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "shop/models.py", "class Order:\n    class Line: pass\n\nclass Customer: pass\n");
        write(root, "shop/__init__.py", "class Shop: pass\n");
        write(root, "venv/lib/thing.py", "class Hidden: pass\n");

        let mut resolver = ProjectImportResolver::new(root);
        assert_eq!(resolver.index_project(), 4);

        assert_eq!(
            resolver.resolve("Order", &root.join("shop/views.py")),
            Some(Resolution::Import("from shop.models import Order".into()))
        );
        assert_eq!(
            resolver.resolve("Shop", &root.join("main.py")),
            Some(Resolution::Import("from shop import Shop".into()))
        );
        assert_eq!(
            resolver.resolve("Customer", &root.join("shop/models.py")),
            Some(Resolution::Available)
        );
        assert_eq!(
            resolver.resolve("Order.Line", &root.join("main.py")),
            Some(Resolution::Import("from shop.models import Order".into()))
        );
        assert_eq!(resolver.resolve("Line", &root.join("main.py")), None);
        assert_eq!(resolver.resolve("Hidden", &root.join("main.py")), None);
    }

    #[test]
    fn test_virtualenv_classes() {
        let dir = TempDir::new().unwrap();
        let venv = dir.path().join("venv");
        write(&venv, "lib/python3.11/site-packages/requests/models.py", "class Response: pass\n");

        let mut resolver = ProjectImportResolver::new(dir.path());
        assert_eq!(resolver.index_virtualenv(&venv), 1);
        assert_eq!(
            resolver.resolve("Response", &dir.path().join("app.py")),
            Some(Resolution::Import("from requests.models import Response".into()))
        );
    }
}
