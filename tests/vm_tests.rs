//! End-to-end tests: WAT fixtures parsed, compiled for the host and run on a VM.

#![cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]

mod common;

#[cfg(test)]
mod tests {
    use super::common::{compile_wat, parse_wat, ADD};
    use rstest::rstest;
    use wasmcc::compiler::{Architecture, Compiler};
    use wasmcc::runtime::vm::VM;
    use wasmcc::runtime::RuntimeError;

    fn host_vm(source: &str) -> VM {
        let compiled = Compiler::native()
            .expect("host is supported")
            .compile_module(parse_wat(source))
            .expect("Failed to compile");
        VM::create(compiled).expect("Failed to create VM")
    }

    // =======================================================================
    // Calls
    // =======================================================================

    #[test]
    fn test_add() {
        let vm = host_vm(ADD);
        let add = vm.lookup_function::<(i32, i32), i32>("add").expect("add not found");
        assert_eq!(add.call((3, 4)).expect("call failed"), 7);
    }

    #[rstest]
    #[case(0, 0, 0)]
    #[case(-1, 1, 0)]
    #[case(i32::MAX, 1, i32::MIN)]
    #[case(-20, -22, -42)]
    fn test_add_wraps(#[case] lhs: i32, #[case] rhs: i32, #[case] expected: i32) {
        let vm = host_vm(ADD);
        let add = vm.lookup_function::<(i32, i32), i32>("add").expect("add not found");
        assert_eq!(add.call((lhs, rhs)).expect("call failed"), expected);
    }

    #[test]
    fn test_repeated_calls() {
        let vm = host_vm(ADD);
        let add = vm.lookup_function::<(i32, i32), i32>("add").expect("add not found");
        for i in 0..100 {
            assert_eq!(add.call((i, i)).expect("call failed"), 2 * i);
        }
    }

    #[test]
    fn test_locals_and_return() {
        let vm = host_vm(
            r#"
            (module
              (func (export "f") (param i32) (result i32) (local i32)
                i32.const 10
                local.set 1
                local.get 0
                local.get 1
                i32.add
                return
                i32.const 99))
            "#,
        );
        let f = vm.lookup_function::<(i32,), i32>("f").expect("f not found");
        assert_eq!(f.call((5,)).expect("call failed"), 15);
    }

    #[test]
    fn test_deep_stack() {
        let consts: String = (1..=20).map(|i| format!("i32.const {i}\n")).collect();
        let adds = "i32.add\n".repeat(19);
        let vm = host_vm(&format!(
            "(module (func (export \"sum\") (result i32) {consts} {adds}))"
        ));
        let sum = vm.lookup_function::<(), i32>("sum").expect("sum not found");
        assert_eq!(sum.call(()).expect("call failed"), 210);
    }

    #[test]
    fn test_very_deep_stack() {
        let depth = 4100;
        let vm = host_vm(&format!(
            "(module (func (export \"deep\") (param i32) (result i32) local.get 0 {} {}))",
            "i32.const 1\n".repeat(depth),
            "i32.add\n".repeat(depth)
        ));
        let deep = vm.lookup_function::<(i32,), i32>("deep").expect("deep not found");
        assert_eq!(deep.call((5,)).expect("call failed"), 4105);
    }

    #[test]
    fn test_no_result() {
        let vm = host_vm(r#"(module (func (export "nothing")))"#);
        let nothing = vm.lookup_function::<(), ()>("nothing").expect("nothing not found");
        nothing.call(()).expect("call failed");
    }

    // =======================================================================
    // Lookup
    // =======================================================================

    #[test]
    fn test_lookup_rejects_unknown_names_and_signatures() {
        let vm = host_vm(ADD);
        assert!(vm.lookup_function::<(i32, i32), i32>("sub").is_none());
        assert!(vm.lookup_function::<(i32,), i32>("add").is_none());
        assert!(vm.lookup_function::<(i64, i64), i64>("add").is_none());
        assert!(vm.lookup_function::<(i32, i32), ()>("add").is_none());
    }

    // =======================================================================
    // Computations
    // =======================================================================

    #[test]
    fn test_computation_is_parked() {
        let vm = host_vm(ADD);
        let add = vm.lookup_function::<(i32, i32), i32>("add").expect("add not found");
        let computation = add.invoke((1, 2)).expect("invoke failed");
        assert!(!computation.is_done());
        assert_eq!(computation.result(), None);

        computation.execute().expect("execute failed");
        assert!(computation.is_done());
        assert_eq!(computation.result(), Some(3));

        // executing a finished computation does nothing
        computation.execute().expect("execute failed");
        assert_eq!(computation.result(), Some(3));
    }

    #[test]
    fn test_one_computation_at_a_time() {
        let vm = host_vm(ADD);
        let add = vm.lookup_function::<(i32, i32), i32>("add").expect("add not found");
        let first = add.invoke((1, 2)).expect("invoke failed");
        assert!(matches!(add.invoke((3, 4)), Err(RuntimeError::Busy)));
        assert!(matches!(add.call((3, 4)), Err(RuntimeError::Busy)));
        first.execute().expect("execute failed");
        assert_eq!(add.call((3, 4)).expect("call failed"), 7);
    }

    #[test]
    fn test_cancel() {
        let vm = host_vm(ADD);
        let add = vm.lookup_function::<(i32, i32), i32>("add").expect("add not found");
        let cancelled = add.invoke((1, 2)).expect("invoke failed");
        cancelled.cancel().expect("cancel failed");
        assert!(cancelled.is_done());
        assert_eq!(cancelled.result(), None);

        assert_eq!(add.call((5, 6)).expect("call failed"), 11);
        // the cancelled computation never ran
        assert_eq!(cancelled.result(), None);
    }

    #[test]
    fn test_dropping_a_parked_computation_frees_the_vm() {
        let vm = host_vm(ADD);
        let add = vm.lookup_function::<(i32, i32), i32>("add").expect("add not found");
        drop(add.invoke((1, 2)).expect("invoke failed"));
        assert_eq!(add.call((2, 3)).expect("call failed"), 5);
    }

    #[test]
    fn test_stale_computation_leaves_later_one_alone() {
        let vm = host_vm(ADD);
        let add = vm.lookup_function::<(i32, i32), i32>("add").expect("add not found");
        let first = add.invoke((1, 2)).expect("invoke failed");
        first.cancel().expect("cancel failed");

        let second = add.invoke((3, 4)).expect("invoke failed");
        assert!(first.is_done());
        assert!(!second.is_done());
        // neither of these may touch the second computation
        first.execute().expect("execute failed");
        first.cancel().expect("cancel failed");
        drop(first);
        assert!(!second.is_done());

        second.execute().expect("execute failed");
        assert_eq!(second.result(), Some(7));
    }

    // =======================================================================
    // Creation
    // =======================================================================

    #[test]
    fn test_foreign_module_is_rejected() {
        let foreign = match Architecture::host() {
            Some(Architecture::X86_64) => Architecture::Aarch64,
            _ => Architecture::X86_64,
        };
        match VM::create(compile_wat(ADD, foreign)) {
            Err(RuntimeError::ForeignArchitecture(arch)) => assert_eq!(arch, foreign),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("ran a module compiled for {foreign}"),
        }
    }

    #[test]
    fn test_vms_are_independent() {
        let first = host_vm(ADD);
        let second = host_vm(ADD);
        let add1 = first.lookup_function::<(i32, i32), i32>("add").expect("add not found");
        let add2 = second.lookup_function::<(i32, i32), i32>("add").expect("add not found");
        let parked = add1.invoke((1, 1)).expect("invoke failed");
        assert_eq!(add2.call((2, 2)).expect("call failed"), 4);
        parked.execute().expect("execute failed");
        assert_eq!(parked.result(), Some(2));
    }
}
