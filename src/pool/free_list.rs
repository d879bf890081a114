use std::ptr::NonNull;

// overlaid on the first word of a free block
struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

/// An intrusive stack of free blocks of a single size class.
#[derive(Default)]
pub struct FreeList {
    head: Option<NonNull<FreeNode>>,
    len: usize,
}

unsafe impl Send for FreeList {}

impl FreeList {
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// # Safety
    /// `block` must be at least a word large, word aligned, and not in use.
    pub unsafe fn push(&mut self, block: NonNull<u8>) {
        let node = block.cast::<FreeNode>();

        node.as_ptr().write(FreeNode { next: self.head });
        self.head = Some(node);
        self.len += 1;
    }

    pub fn pop(&mut self) -> Option<NonNull<u8>> {
        let node = self.head?;

        unsafe {
            self.head = (*node.as_ptr()).next;
        }
        self.len -= 1;

        Some(node.cast())
    }

    /// Detaches up to `n` blocks from the top of this list.
    pub fn split_off(&mut self, n: usize) -> FreeList {
        let mut taken = FreeList::new();

        if n == 0 || self.is_empty() {
            return taken;
        }

        if n >= self.len {
            return std::mem::take(self);
        }

        let mut tail = match self.head {
            Some(head) => head,
            None => return taken,
        };

        unsafe {
            for _ in 1..n {
                match (*tail.as_ptr()).next {
                    Some(next) => tail = next,
                    None => break,
                }
            }

            taken.head = self.head;
            taken.len = n;
            self.head = (*tail.as_ptr()).next;
            self.len -= n;
            (*tail.as_ptr()).next = None;
        }

        taken
    }

    pub fn append(&mut self, mut other: FreeList) {
        let Some(other_head) = other.head else {
            return;
        };

        let mut tail = other_head;

        unsafe {
            while let Some(next) = (*tail.as_ptr()).next {
                tail = next;
            }

            (*tail.as_ptr()).next = self.head;
        }

        self.head = Some(other_head);
        self.len += other.len;
        other.head = None;
        other.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(n: usize) -> Vec<[usize; 2]> {
        vec![[0; 2]; n]
    }

    fn push_all(list: &mut FreeList, backing: &mut [[usize; 2]]) {
        for block in backing.iter_mut() {
            unsafe { list.push(NonNull::from(block).cast()) }
        }
    }

    #[test]
    fn push_then_pop_is_lifo() {
        let mut backing = blocks(3);
        let expected: Vec<*mut u8> = backing
            .iter_mut()
            .rev()
            .map(|b| b.as_mut_ptr().cast())
            .collect();
        let mut list = FreeList::new();

        push_all(&mut list, &mut backing);
        assert_eq!(list.len(), 3);

        for ptr in expected {
            assert_eq!(list.pop().unwrap().as_ptr(), ptr);
        }

        assert!(list.pop().is_none());
        assert!(list.is_empty());
    }

    #[test]
    fn split_off_half() {
        let mut backing = blocks(10);
        let mut list = FreeList::new();

        push_all(&mut list, &mut backing);

        let mut half = list.split_off(5);

        assert_eq!(half.len(), 5);
        assert_eq!(list.len(), 5);

        let mut count = 0;
        while half.pop().is_some() {
            count += 1;
        }
        while list.pop().is_some() {
            count += 1;
        }

        assert_eq!(count, 10);
    }

    #[test]
    fn split_off_more_than_len_takes_everything() {
        let mut backing = blocks(4);
        let mut list = FreeList::new();

        push_all(&mut list, &mut backing);

        let taken = list.split_off(100);

        assert_eq!(taken.len(), 4);
        assert!(list.is_empty());
        assert_eq!(list.split_off(1).len(), 0);
    }

    #[test]
    fn append_joins_lists() {
        let mut a_backing = blocks(3);
        let mut b_backing = blocks(7);
        let mut a = FreeList::new();
        let mut b = FreeList::new();

        push_all(&mut a, &mut a_backing);
        push_all(&mut b, &mut b_backing);
        a.append(b);
        a.append(FreeList::new());

        assert_eq!(a.len(), 10);

        let mut count = 0;
        while a.pop().is_some() {
            count += 1;
        }

        assert_eq!(count, 10);
    }
}
